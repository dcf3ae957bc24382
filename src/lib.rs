#![forbid(unsafe_code)]
//! Rewrite Prometheus exposition samples as InfluxDB line protocol.
//!
//! The Prometheus text format is described here:
//! <https://prometheus.io/docs/instrumenting/exposition_formats/>
//!
//! The InfluxDB line protocol is described here:
//! <https://docs.influxdata.com/influxdb/v1/write_protocols/line_protocol_reference/>
//!
//! Only samples whose metric name matches one of the configured relevant prefixes are
//! rewritten. Every rewritten sample lands in a single measurement, the metric name (or the
//! part of it following the prefix) is turned into an `item` tag, the sample labels become
//! tags, and the sample value becomes the `value` field.
use derive_more::Constructor;
use std::{
    fmt::Display,
    io::BufRead,
};
use tracing::{
    debug,
    trace,
};

pub use config::{
    BridgeConfig,
    Measurement,
    RelevantPrefixes,
    Timestamp,
};
pub use error::{
    BridgeError,
    EXIT_FETCH,
    EXIT_USAGE,
};
pub use fetch::Scraper;
pub use parser::{
    extract_tags,
    parse_sample,
};

mod config;
mod error;
mod fetch;
mod parser;

/// A single tag, taken from a label of the sample.
///
/// Example:
/// ```text
/// domain="DB"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Constructor)]
pub struct Tag {
    /// Tag key
    pub key: String,
    /// Tag value (without the quotes)
    pub value: String,
}

/// The ordered tag set of a line protocol record.
///
/// The order is the order of appearance in the source sample, nothing is sorted.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Default,
    derive_more::Deref,
    derive_more::DerefMut,
    derive_more::From,
)]
#[repr(transparent)]
pub struct Tags(Vec<Tag>);

impl Display for Tags {
    /// Print every tag prefixed by a comma, ready to follow the measurement name.
    /// Example:
    /// ```text
    /// ,domain=DB,item=TransactionsTotal
    /// ```
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for tag in self.0.iter() {
            f.write_str(",")?;
            f.write_str(&tag.key)?;
            f.write_str("=")?;
            f.write_str(&tag.value)?;
        }
        Ok(())
    }
}

/// A tokenized sample line.
///
/// Examples:
/// ```text
/// seconds_since_last_successful_run 46598.538422381
/// metrics_DBPuller{domain="DB",item="TransactionsTotal"} 17
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Constructor)]
pub struct Sample<'a> {
    /// The metric name, excluding the labels.
    pub name: &'a str,
    /// The raw content of the label block, without the braces.
    pub labels: Option<&'a str>,
    /// The sample value. Copied as is, never parsed.
    pub value: &'a str,
}

impl<'a> Sample<'a> {
    /// Tokenize a line. Lines which are not samples (comments, HELP, TYPE, empty lines,
    /// garbage) return `None`.
    pub fn parse(line: &'a str) -> Option<Self> {
        parse_sample(line)
    }

    /// Decide how the sample relates to `prefix`.
    pub fn classify(&self, prefix: &str) -> Option<Shape> {
        if prefix.is_empty() {
            return None;
        }
        if self.name == prefix {
            return match self.labels {
                None => Some(Shape::Exact),
                Some(_) => Some(Shape::PrefixedOnly),
            };
        }
        self.identifier(prefix)
            .map(|_| Shape::PrefixedWithIdentifier)
    }

    /// The part of the metric name following `prefix` and its `_` separator.
    pub fn identifier(&self, prefix: &str) -> Option<&'a str> {
        let identifier = self.name.strip_prefix(prefix)?.strip_prefix('_')?;
        (!identifier.is_empty()).then_some(identifier)
    }

    /// The tags found in the label block. Empty when there is no label block.
    pub fn tags(&self) -> Tags {
        self.labels.map(extract_tags).unwrap_or_default()
    }
}

/// The ways a sample can match a relevant prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Shape {
    /// The prefix is the whole metric name and there is no label block.
    ///
    /// Example, for the prefix `seconds_since_last_successful_run`:
    /// ```text
    /// seconds_since_last_successful_run 46598.538422381
    /// ```
    Exact,
    /// The prefix is the whole metric name, followed by a label block.
    ///
    /// Example, for the prefix `metrics_DBPuller`:
    /// ```text
    /// metrics_DBPuller{domain="DB",item="TransactionsTotal"} 17
    /// ```
    PrefixedOnly,
    /// The prefix is a namespace, the rest of the metric name identifies the item.
    ///
    /// Example, for the prefix `contactvalidator`:
    /// ```text
    /// contactvalidator_return_proc{field="files",result="err"} 0
    /// ```
    PrefixedWithIdentifier,
}

/// Tokenize `line` and classify it against `prefix`.
pub fn classify(line: &str, prefix: &str) -> Option<Shape> {
    Sample::parse(line)?.classify(prefix)
}

/// A single InfluxDB line protocol record with a single `value` field.
#[derive(Debug, Clone, PartialEq, Eq, Constructor)]
pub struct InfluxRecord {
    pub measurement: String,
    pub tags: Tags,
    /// The field value, copied verbatim from the sample.
    pub value: String,
    pub timestamp: Timestamp,
}

impl Display for InfluxRecord {
    /// Print the record.
    /// Example:
    /// ```text
    /// sensu,item=return_proc,field=files,result=err value=0 1700000000000000000
    /// ```
    ///
    /// NOTES:
    /// * New line is not added.
    /// * Keys and values are not escaped, tags only ever hold word characters.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{} value={} {}",
            self.measurement, self.tags, self.value, self.timestamp
        )
    }
}

/// Rewrite a sample already classified against `prefix` into a line protocol record.
pub fn transform(
    shape: Shape,
    sample: &Sample<'_>,
    prefix: &str,
    measurement: &Measurement,
    timestamp: Timestamp,
) -> InfluxRecord {
    let tags: Tags = match shape {
        Shape::Exact => vec![Tag::new("item".into(), sample.name.into())].into(),
        Shape::PrefixedOnly => sample.tags(),
        Shape::PrefixedWithIdentifier => {
            let mut tags = Tags::default();
            if let Some(identifier) = sample.identifier(prefix) {
                tags.push(Tag::new("item".into(), identifier.into()));
            }
            tags.extend(sample.tags().0);
            tags
        }
    };
    InfluxRecord::new(
        measurement.to_string(),
        tags,
        sample.value.into(),
        timestamp,
    )
}

/// Converts scraped exposition text according to a `BridgeConfig`.
#[derive(Debug, Clone, Constructor)]
pub struct Bridge {
    config: BridgeConfig,
}

impl Bridge {
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Convert a single exposition line.
    ///
    /// Every relevant prefix is tried on its own, so a line matching several prefixes
    /// yields one record per matching prefix, in the order the prefixes were configured.
    pub fn convert_line(&self, line: &str) -> Vec<InfluxRecord> {
        let Some(sample) = Sample::parse(line) else {
            trace!(line, "skipping line which is not a sample");
            return Vec::new();
        };
        let records = self
            .config
            .prefixes
            .iter()
            .filter_map(|prefix| {
                let shape = sample.classify(prefix)?;
                debug!(%shape, prefix = prefix.as_str(), name = sample.name, "relevant sample");
                Some(transform(
                    shape,
                    &sample,
                    prefix,
                    &self.config.measurement,
                    self.config.timestamp,
                ))
            })
            .collect::<Vec<_>>();
        if records.is_empty() {
            trace!(name = sample.name, "skipping irrelevant sample");
        }
        records
    }

    /// Convert a complete exposition body into newline terminated line protocol records.
    pub fn convert_scrape(&self, body: &str) -> String {
        let mut output = String::new();
        for line in body.lines() {
            self.append_line(&mut output, line);
        }
        output
    }

    /// Same as `convert_scrape`, reading the body line by line.
    /// Nothing is returned unless the whole body could be read.
    ///
    /// Lines are read as bytes: a line which is not valid UTF-8 cannot be a relevant sample
    /// and is skipped like any other irrelevant line.
    pub fn convert_reader<R: BufRead>(&self, mut reader: R) -> std::io::Result<String> {
        let mut output = String::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let raw = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            match std::str::from_utf8(raw) {
                Ok(line) => self.append_line(&mut output, line),
                Err(e) => trace!(error = %e, "skipping line which is not valid UTF-8"),
            }
        }
        Ok(output)
    }

    /// Fetch the exposition from `scraper` and convert it.
    pub fn scrape(&self, scraper: &Scraper) -> Result<String, BridgeError> {
        let body = scraper.scrape()?;
        self.convert_reader(body)
            .map_err(|source| BridgeError::Read {
                endpoint: scraper.endpoint().to_string(),
                source,
            })
    }

    fn append_line(&self, output: &mut String, line: &str) {
        for record in self.convert_line(line) {
            output.push_str(&record.to_string());
            output.push('\n');
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::{
        classify,
        Bridge,
        BridgeConfig,
        Measurement,
        RelevantPrefixes,
        Sample,
        Shape,
        Timestamp,
    };
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::{
        io::Cursor,
        str::FromStr,
        sync::Once,
    };
    use tracing_subscriber::EnvFilter;

    static INIT_LOGGER: Once = Once::new();

    pub(crate) fn init_test_logging() {
        INIT_LOGGER.call_once(|| {
            tracing_subscriber::fmt::fmt()
                .with_env_filter(EnvFilter::new("warn,prom_influx_bridge=trace"))
                .with_test_writer()
                .init();
        });
    }

    pub const SENSU_01: &str = include_str!("../test_data/sensu-exporter-01.txt");
    pub const SENSU_01_EXPECTED: &str = include_str!("../test_data/sensu-exporter-01.influx");
    pub const SENSU_01_PREFIXES: &str =
        "seconds_since_last_successful_run, metrics_DBPuller, contactvalidator";
    pub const NODE_EXPORTER_01: &str = include_str!("../test_data/node-exporter-01.txt");
    pub const TS: i64 = 1_700_000_000_000_000_000;

    pub(crate) fn bridge(measurement: &str, prefixes: &str, ts: i64) -> Bridge {
        let config = BridgeConfig::new(
            Measurement::new(measurement).unwrap(),
            RelevantPrefixes::from_str(prefixes).unwrap(),
            Timestamp::from(ts),
        );
        Bridge::new(config)
    }

    #[rstest]
    #[case::exact("foo", "foo 123.4", &["m,item=foo value=123.4 1700000000000000000"])]
    #[case::prefixed_only(
        "metrics_DBPuller",
        r#"metrics_DBPuller{domain="DB",item="TransactionsTotal"} 17"#,
        &["m,domain=DB,item=TransactionsTotal value=17 1700000000000000000"]
    )]
    #[case::prefixed_with_identifier(
        "contactvalidator",
        r#"contactvalidator_return_proc{field="files",result="err"} 0"#,
        &["m,item=return_proc,field=files,result=err value=0 1700000000000000000"]
    )]
    #[case::identifier_without_labels(
        "contactvalidator",
        "contactvalidator_runs_total 4",
        &["m,item=runs_total value=4 1700000000000000000"]
    )]
    #[case::several_spaces("foo", "foo    7", &["m,item=foo value=7 1700000000000000000"])]
    #[case::tab_separated("foo", "foo\t7", &["m,item=foo value=7 1700000000000000000"])]
    #[case::sample_timestamp_ignored(
        "foo",
        r#"foo{a="b"} 3 1395066363000"#,
        &["m,a=b value=3 1700000000000000000"]
    )]
    #[case::value_copied_verbatim("foo", "foo -1.23e+1", &["m,item=foo value=-1.23e+1 1700000000000000000"])]
    #[case::unparseable_label_dropped(
        "foo",
        r#"foo{path="/tmp",kind="disk"} 5"#,
        &["m,kind=disk value=5 1700000000000000000"]
    )]
    #[case::escaped_quote_label_dropped(
        "foo",
        r#"foo{msg="say \"hi\"",a="1"} 2"#,
        &["m,a=1 value=2 1700000000000000000"]
    )]
    #[case::multiple_prefixes(
        "a, a_b",
        "a_b_c 1",
        &["m,item=b_c value=1 1700000000000000000", "m,item=c value=1 1700000000000000000"]
    )]
    #[case::trailing_tokens_ignored(
        "foo",
        "foo 1 99999999999999999999",
        &["m,item=foo value=1 1700000000000000000"]
    )]
    #[case::fractional_timestamp_ignored("foo", "foo 1 1.5", &["m,item=foo value=1 1700000000000000000"])]
    #[case::stray_label_block("foo", r#"foo {a="b"} 1"#, &[])]
    #[case::unrelated("foo", "bar 1", &[])]
    #[case::no_separator_after_prefix("foo", "foobar 1", &[])]
    #[case::empty_identifier("foo", "foo_ 1", &[])]
    #[case::help_line("foo", "# HELP foo Something about foo.", &[])]
    #[case::type_line("foo", "# TYPE foo counter", &[])]
    #[case::empty_line("foo", "", &[])]
    #[case::missing_value("foo", r#"foo{a="b"}"#, &[])]
    #[case::empty_prefixes("", "foo 1", &[])]
    #[case::blank_prefixes(" , ,", "foo 1", &[])]
    fn test_convert_line(#[case] prefixes: &str, #[case] line: &str, #[case] expected: &[&str]) {
        init_test_logging();

        let bridge = bridge("m", prefixes, TS);
        let records = bridge
            .convert_line(line)
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        assert_eq!(records, expected);
    }

    #[test]
    fn test_classify() {
        init_test_logging();

        let cases = [
            (
                "seconds_since_last_successful_run 46598.538422381",
                "seconds_since_last_successful_run",
                Some(Shape::Exact),
            ),
            (
                r#"metrics_DBPuller{domain="DB",item="TransactionsTotal"} 17"#,
                "metrics_DBPuller",
                Some(Shape::PrefixedOnly),
            ),
            (
                r#"contactvalidator_return_proc{field="files",result="err"} 0"#,
                "contactvalidator",
                Some(Shape::PrefixedWithIdentifier),
            ),
            (
                r#"contactvalidator_return_proc{field="files",result="err"} 0"#,
                "contactvalidator_return_proc",
                Some(Shape::PrefixedOnly),
            ),
            ("metrics_DBPuller 1", "metrics", Some(Shape::PrefixedWithIdentifier)),
            ("metrics_DBPuller 1", "metrics_DB", None),
            ("metrics_DBPuller 1", "", None),
            ("# TYPE metrics_DBPuller counter", "metrics_DBPuller", None),
        ];
        for (line, prefix, expected) in cases {
            assert_eq!(classify(line, prefix), expected, "line: '{line}' prefix: '{prefix}'");
        }
    }

    #[test]
    fn test_shape_display() {
        assert_eq!(Shape::Exact.to_string(), "exact");
        assert_eq!(Shape::PrefixedOnly.to_string(), "prefixed_only");
        let name: &'static str = Shape::PrefixedWithIdentifier.into();
        assert_eq!(name, "prefixed_with_identifier");
    }

    #[test]
    fn test_sample_identifier() {
        let sample = Sample::parse(r#"contactvalidator_return_proc{field="files"} 0"#).unwrap();
        assert_eq!(sample.identifier("contactvalidator"), Some("return_proc"));
        assert_eq!(sample.identifier("contactvalidator_return"), Some("proc"));
        assert_eq!(sample.identifier("contact"), None);
        assert_eq!(sample.identifier("contactvalidator_return_proc"), None);
    }

    #[test]
    fn test_convert_scrape() {
        init_test_logging();

        let bridge = bridge("sensu", SENSU_01_PREFIXES, TS);
        let output = bridge.convert_scrape(SENSU_01);
        assert_eq!(output, SENSU_01_EXPECTED);
    }

    #[test]
    fn test_convert_reader() {
        init_test_logging();

        let bridge = bridge("sensu", SENSU_01_PREFIXES, TS);
        let output = bridge.convert_reader(Cursor::new(SENSU_01)).unwrap();
        assert_eq!(output, SENSU_01_EXPECTED);
    }

    #[test]
    fn test_convert_reader_skips_non_utf8_lines() {
        init_test_logging();

        let body: &[u8] = b"# HELP foo caf\xe9 latin1 help\r\nfoo 1\r\nbar{a=\"caf\xe9\"} 3\nbar{a=\"b\"} 2";
        let output = bridge("m", "foo, bar", TS)
            .convert_reader(Cursor::new(body))
            .unwrap();
        let expected = [
            "m,item=foo value=1 1700000000000000000",
            "m,a=b value=2 1700000000000000000",
            "",
        ]
        .join("\n");
        assert_eq!(output, expected);
    }

    #[rstest]
    fn test_no_relevant_prefix(
        #[values("", " ", ",", " , , ")] prefixes: &str,
        #[values(SENSU_01, NODE_EXPORTER_01)] data: &str,
    ) {
        init_test_logging();

        let bridge = bridge("sensu", prefixes, TS);
        assert!(bridge.config().prefixes.is_empty());
        assert_eq!(bridge.convert_scrape(data), "");
    }

    #[test]
    fn test_node_exporter_scrape() {
        init_test_logging();

        let bridge = bridge("node", "node_load1, node_filesystem", TS);
        let output = bridge.convert_scrape(NODE_EXPORTER_01);
        let expected = [
            "node,item=avail_bytes,device=sda1,fstype=ext4 value=4.0560812032e+10 1700000000000000000",
            "node,item=avail_bytes,device=tmpfs,fstype=tmpfs value=1.6777216e+07 1700000000000000000",
            "node,item=readonly,device=sda1,fstype=ext4 value=0 1700000000000000000",
            "node,item=node_load1 value=0.21 1700000000000000000",
            "",
        ]
        .join("\n");
        assert_eq!(output, expected);
    }

    #[test]
    fn test_same_run_is_deterministic() {
        init_test_logging();

        let first = bridge("sensu", SENSU_01_PREFIXES, TS).convert_scrape(SENSU_01);
        let second = bridge("sensu", SENSU_01_PREFIXES, TS).convert_scrape(SENSU_01);
        assert_eq!(first, second);
    }

    #[test]
    fn test_runs_differ_by_timestamp_only() {
        init_test_logging();

        let first = bridge("sensu", SENSU_01_PREFIXES, TS).convert_scrape(SENSU_01);
        let second = bridge("sensu", SENSU_01_PREFIXES, TS + 1).convert_scrape(SENSU_01);
        assert_ne!(first, second);

        let strip = |output: &str, ts: i64| {
            let suffix = format!(" {ts}");
            output
                .lines()
                .map(|l| l.strip_suffix(suffix.as_str()).unwrap().to_owned())
                .collect::<Vec<_>>()
        };
        assert_eq!(strip(&first, TS), strip(&second, TS + 1));
    }
}
