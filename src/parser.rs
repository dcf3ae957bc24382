use super::{
    Sample,
    Tag,
    Tags,
};
use winnow::{
    ascii::{
        escaped,
        space1,
    },
    combinator::{
        alt,
        cut_err,
        delimited,
        opt,
        preceded,
        repeat,
        rest,
        terminated,
    },
    stream::Accumulate,
    token::{
        any,
        none_of,
        one_of,
        take_till,
        take_while,
    },
    PResult,
    Parser,
};

/// Parse a valid prometheus `metric_name`.
fn name_parser<'a>(input: &mut &'a str) -> PResult<&'a str> {
    let start_group = ('a'..='z', 'A'..='Z', '_', ':');
    let rest_group = ('a'..='z', 'A'..='Z', '0'..='9', '_', ':');
    (one_of(start_group), take_while(0.., rest_group))
        .recognize()
        .parse_next(input)
}

/// Parse a quoted prometheus label value, returning it without the quotes.
///
/// Examples:
///
/// * `"Test"`
/// * `"Some value"`
fn parse_label_value<'a>(input: &mut &'a str) -> PResult<&'a str> {
    let escaped = escaped(none_of(['"', '\\']), '\\', one_of(['"', 'n', '\\']));
    preceded('"', cut_err(terminated(escaped, '"'))).parse_next(input)
}

/// Skip over the content of a label block. Quoted values may hold anything, including
/// braces and escaped quotes.
fn label_block_body(input: &mut &str) -> PResult<()> {
    let quoted = parse_label_value.void();
    let unquoted = none_of(['"', '}']).void();
    repeat(0.., alt((quoted, unquoted))).parse_next(input)
}

/// Parse a label block, returning its raw content without the braces.
///
/// Examples:
/// * `{key1="value1",key2="value2"}`
/// * `{path="C:\\DIR\\FILE.TXT",error="Cannot find file:\n\"FILE.TXT\""}`
/// * `{}`
fn label_block_parser<'a>(input: &mut &'a str) -> PResult<&'a str> {
    delimited('{', label_block_body.recognize(), '}').parse_next(input)
}

/// Parse a sample value. Any token up to the next blank is accepted, it is never
/// interpreted. A stray label block is not a value.
fn value_parser<'a>(input: &mut &'a str) -> PResult<&'a str> {
    (none_of([' ', '\t', '{']), take_till(0.., (' ', '\t')))
        .recognize()
        .parse_next(input)
}

/// Parse a Prometheus sample line.
///
/// Examples:
/// * `metrics_DBPuller{domain="DB",item="TransactionsTotal"} 17`
/// * `seconds_since_last_successful_run 46598.538422381`
/// * `http_requests_total{method="post",code="200"} 1027 1395066363000`
fn sample_line_parser<'a>(input: &mut &'a str) -> PResult<Sample<'a>> {
    let name = name_parser.parse_next(input)?;
    let labels = opt(label_block_parser).parse_next(input)?;
    let value = preceded(space1, value_parser).parse_next(input)?;
    // Whatever follows the value, usually the exposition timestamp, is dropped: records
    // carry the run timestamp
    rest.void().parse_next(input)?;
    Ok(Sample::new(name, labels, value))
}

/// Tokenize a single exposition line into a `Sample`.
///
/// Returns `None` for anything that is not a sample line.
pub fn parse_sample(line: &str) -> Option<Sample<'_>> {
    sample_line_parser.parse(line).ok()
}

/// A run of ASCII letters, digits and underscores
fn word_parser<'a>(input: &mut &'a str) -> PResult<&'a str> {
    take_while(1.., ('a'..='z', 'A'..='Z', '0'..='9', '_')).parse_next(input)
}

/// Parse a `key="value"` pair where both sides are words.
///
/// Examples:
///
/// * `domain="DB"`
/// * `result="err"`
fn tag_parser(input: &mut &str) -> PResult<Tag> {
    let key = word_parser.parse_next(input)?;
    let value = delimited("=\"", word_parser, '"').parse_next(input)?;
    Ok(Tag::new(key.into(), value.into()))
}

// Collect the matched pairs into `Tags`, skipping the characters in between
impl Accumulate<Option<Tag>> for Tags {
    fn initial(capacity: Option<usize>) -> Self {
        Vec::with_capacity(capacity.unwrap_or(4)).into()
    }

    fn accumulate(&mut self, acc: Option<Tag>) {
        if let Some(tag) = acc {
            self.push(tag);
        }
    }
}

/// Scan `text` left to right for every `key="value"` pair.
fn tags_parser(input: &mut &str) -> PResult<Tags> {
    repeat(0.., alt((tag_parser.map(Some), any.map(|_| None)))).parse_next(input)
}

/// Extract all the `key="value"` pairs of `text`, in order of appearance.
///
/// Keys and values must both be made of word characters (letters, digits, underscore).
/// A pair whose value holds anything else is skipped, it is not an error.
pub fn extract_tags(text: &str) -> Tags {
    tags_parser.parse(text).unwrap_or_default()
}
