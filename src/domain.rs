use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MirrorError;

/// Calendar day (UTC) anchoring one mirror pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReferenceDate(NaiveDate);

impl ReferenceDate {
    pub fn today() -> Self {
        Self(Utc::now().date_naive())
    }

    /// `YYYYMMDD`, the token upstream filenames embed.
    pub fn marker(&self) -> String {
        self.0.format("%Y%m%d").to_string()
    }

    /// Wall-clock start of `run` on this day.
    pub fn run_start(&self, run: &RunHour) -> DateTime<Utc> {
        let naive = self
            .0
            .and_hms_opt(run.hour(), 0, 0)
            .unwrap_or_else(|| self.0.and_time(chrono::NaiveTime::MIN));
        Utc.from_utc_datetime(&naive)
    }
}

impl fmt::Display for ReferenceDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.marker())
    }
}

impl FromStr for ReferenceDate {
    type Err = MirrorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.len() != 8 || !trimmed.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(MirrorError::InvalidDate(value.to_string()));
        }
        NaiveDate::parse_from_str(trimmed, "%Y%m%d")
            .map(Self)
            .map_err(|_| MirrorError::InvalidDate(value.to_string()))
    }
}

/// Model initialisation hour. Keeps the label exactly as configured ("00",
/// "06", ...) because it is reused verbatim in URLs and storage keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunHour {
    label: String,
    hour: u32,
}

impl RunHour {
    pub fn as_str(&self) -> &str {
        &self.label
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }
}

impl fmt::Display for RunHour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

impl FromStr for RunHour {
    type Err = MirrorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let label = value.trim().to_string();
        if label.is_empty() || !label.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(MirrorError::InvalidRun(value.to_string()));
        }
        let hour: u32 = label
            .parse()
            .map_err(|_| MirrorError::InvalidRun(value.to_string()))?;
        if hour > 23 {
            return Err(MirrorError::InvalidRun(value.to_string()));
        }
        Ok(Self { label, hour })
    }
}

/// Block compression recognised by filename suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Bzip2,
    Gzip,
}

impl Codec {
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.ends_with(".bz2") {
            Some(Codec::Bzip2)
        } else if filename.ends_with(".gz") {
            Some(Codec::Gzip)
        } else {
            None
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Codec::Bzip2 => ".bz2",
            Codec::Gzip => ".gz",
        }
    }

    pub fn strip<'a>(self, filename: &'a str) -> &'a str {
        filename.strip_suffix(self.suffix()).unwrap_or(filename)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Bzip2 => write!(f, "bzip2"),
            Codec::Gzip => write!(f, "gzip"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Grid,
    Subgrid,
    Level,
    Date,
    Run,
    Step,
    Var,
    VarUpper,
}

impl FromStr for Field {
    type Err = MirrorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "grid" => Ok(Field::Grid),
            "subgrid" => Ok(Field::Subgrid),
            "level" => Ok(Field::Level),
            "date" => Ok(Field::Date),
            "run" => Ok(Field::Run),
            "step" => Ok(Field::Step),
            "var" => Ok(Field::Var),
            "var_upper" => Ok(Field::VarUpper),
            other => Err(MirrorError::Template(format!("unknown placeholder {{{other}}}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Padding {
    zero: bool,
    width: usize,
}

impl FromStr for Padding {
    type Err = MirrorError;

    // Accepts the integer subset of Python-style format specs: "03d", "3d", "03", "d".
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let digits = spec.strip_suffix('d').unwrap_or(spec);
        if !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(MirrorError::Template(format!("unsupported format spec :{spec}")));
        }
        if digits.is_empty() {
            return Ok(Padding::default());
        }
        let width = digits
            .parse()
            .map_err(|_| MirrorError::Template(format!("unsupported format spec :{spec}")))?;
        Ok(Padding {
            zero: digits.starts_with('0'),
            width,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Field, Padding),
}

/// Pre-parsed filename template, e.g.
/// `icon-eu_europe_{grid}_{level}_{date}{run}_{step:03d}_{var_upper}.grib2.bz2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTemplate {
    source: String,
    segments: Vec<Segment>,
}

/// Values substituted into a [`FileTemplate`].
#[derive(Debug, Clone, Copy)]
pub struct TemplateValues<'a> {
    pub grid: &'a str,
    pub subgrid: &'a str,
    pub level: &'a str,
    pub date: &'a str,
    pub run: &'a str,
    pub step: u32,
    pub var: &'a str,
    pub var_upper: &'a str,
}

impl FileTemplate {
    pub fn render(&self, values: &TemplateValues<'_>) -> String {
        let mut out = String::with_capacity(self.source.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(Field::Step, pad) => {
                    let width = pad.width;
                    if pad.zero {
                        out.push_str(&format!("{:0width$}", values.step));
                    } else {
                        out.push_str(&format!("{:>width$}", values.step));
                    }
                }
                Segment::Field(field, pad) => {
                    let value = match field {
                        Field::Grid => values.grid,
                        Field::Subgrid => values.subgrid,
                        Field::Level => values.level,
                        Field::Date => values.date,
                        Field::Run => values.run,
                        Field::Var => values.var,
                        Field::VarUpper => values.var_upper,
                        Field::Step => unreachable!("handled above"),
                    };
                    let width = pad.width;
                    out.push_str(&format!("{value:<width$}"));
                }
            }
        }
        out
    }
}

impl fmt::Display for FileTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl FromStr for FileTemplate {
    type Err = MirrorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = value.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut inner = String::new();
                    let mut closed = false;
                    for next in chars.by_ref() {
                        if next == '}' {
                            closed = true;
                            break;
                        }
                        inner.push(next);
                    }
                    if !closed {
                        return Err(MirrorError::Template(format!(
                            "unclosed placeholder in {value}"
                        )));
                    }
                    let (name, spec) = match inner.split_once(':') {
                        Some((name, spec)) => (name, Some(spec)),
                        None => (inner.as_str(), None),
                    };
                    let field: Field = name.trim().parse()?;
                    let padding = match spec {
                        Some(spec) => spec.parse()?,
                        None => Padding::default(),
                    };
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(field, padding));
                }
                '}' => {
                    return Err(MirrorError::Template(format!("unmatched '}}' in {value}")));
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: value.to_string(),
            segments,
        })
    }
}

/// Directory index of one (run, variable) partition: `{base_url}/{run}/{variable}/`.
pub fn partition_url(base_url: &str, run: &str, variable: &str) -> String {
    format!("{}/{run}/{variable}/", base_url.trim_end_matches('/'))
}

/// One dataset to mirror, validated and immutable for the duration of a pass.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub base_url: String,
    pub template: FileTemplate,
    pub grid: String,
    pub subgrid: String,
    pub level: String,
    pub runs: Vec<RunHour>,
    pub variables: Vec<String>,
    pub forecast_steps: Vec<u32>,
    pub listing_suffix: String,
    pub decompress: bool,
}

impl Dataset {
    /// `var_upper` is only upper-cased for the icon-eu family; other
    /// families publish lower-case variable tokens in both positions.
    pub fn var_upper(&self, var: &str) -> String {
        if self.name.starts_with("icon-eu") {
            var.to_uppercase()
        } else {
            var.to_string()
        }
    }

    pub fn filename(&self, date: &ReferenceDate, run: &RunHour, var: &str, step: u32) -> String {
        let marker = date.marker();
        let var_upper = self.var_upper(var);
        self.template.render(&TemplateValues {
            grid: &self.grid,
            subgrid: &self.subgrid,
            level: &self.level,
            date: &marker,
            run: run.as_str(),
            step,
            var,
            var_upper: &var_upper,
        })
    }

    pub fn partition_url(&self, run: &RunHour, var: &str) -> String {
        partition_url(&self.base_url, run.as_str(), var)
    }

    pub fn file_url(&self, run: &RunHour, var: &str, filename: &str) -> String {
        format!("{}{}", self.partition_url(run, var), filename)
    }

    pub fn state_key(&self) -> String {
        format!("{}/metadata.json", self.name)
    }

    /// Name the file is stored under: the remote name, minus the compression
    /// suffix when the payload is decompressed in flight.
    pub fn stored_filename<'a>(&self, filename: &'a str) -> &'a str {
        match self.codec_for(filename) {
            Some(codec) => codec.strip(filename),
            None => filename,
        }
    }

    /// Codec applied during transfer, `None` when bytes are stored verbatim.
    pub fn codec_for(&self, filename: &str) -> Option<Codec> {
        if self.decompress {
            Codec::from_filename(filename)
        } else {
            None
        }
    }

    pub fn data_key(
        &self,
        date: &ReferenceDate,
        run: &RunHour,
        var: &str,
        filename: &str,
    ) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.name,
            date.marker(),
            run,
            var,
            self.stored_filename(filename)
        )
    }

    pub fn meta_key(
        &self,
        date: &ReferenceDate,
        run: &RunHour,
        var: &str,
        filename: &str,
    ) -> String {
        format!("{}.json", self.data_key(date, run, var, filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_start_is_utc_hour() {
        let date: ReferenceDate = "20240131".parse().unwrap();
        let run: RunHour = "06".parse().unwrap();
        assert_eq!(date.run_start(&run).to_rfc3339(), "2024-01-31T06:00:00+00:00");
    }

    #[test]
    fn template_escapes_braces() {
        let template: FileTemplate = "{{x}}_{run}".parse().unwrap();
        let rendered = template.render(&TemplateValues {
            grid: "",
            subgrid: "",
            level: "",
            date: "",
            run: "12",
            step: 0,
            var: "",
            var_upper: "",
        });
        assert_eq!(rendered, "{x}_12");
    }
}
