//! Builder for render directives.
//!
//! Directives may use `{period}`, `{filename}` and `{id}` placeholders; the
//! render scheduler fills them in per job.

/// Default image height in pixels.
pub const DEFAULT_HEIGHT: u32 = 150;

/// Default image width in pixels.
pub const DEFAULT_WIDTH: u32 = 700;

/// One image's render directives.
#[derive(Debug, Clone)]
pub struct GraphSpec {
    title: String,
    vertical_label: String,
    height: u32,
    width: u32,
    body: Vec<String>,
}

impl GraphSpec {
    /// Start a graph titled `"{id} <title>"` over the last `{period}`.
    pub fn new(title: impl Into<String>, vertical_label: impl Into<String>) -> Self {
        Self::exact(format!("{{id}} {}", title.into()), vertical_label)
    }

    /// Start a graph whose title is used verbatim.
    pub fn exact(title: impl Into<String>, vertical_label: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            vertical_label: vertical_label.into(),
            height: DEFAULT_HEIGHT,
            width: DEFAULT_WIDTH,
            body: Vec::new(),
        }
    }

    /// Override the image height.
    pub fn height(mut self, height: u32) -> Self {
        self.height = height;
        self
    }

    /// Append one directive.
    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.body.push(line.into());
        self
    }

    /// Append several directives.
    pub fn lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.body.extend(lines.into_iter().map(Into::into));
        self
    }

    /// `DEF` over this plugin's own database.
    pub fn def(self, name: &str, source: &str) -> Self {
        self.line(format!("DEF:{name}={{filename}}:{source}:AVERAGE"))
    }

    /// Max / average / current summary for `name`, closing the legend row.
    pub fn summary(self, name: &str, format: &str, unit: &str) -> Self {
        self.lines([
            format!("GPRINT:{name}:MAX:  Max\\: {format}"),
            format!("GPRINT:{name}:AVERAGE: Avg\\: {format}"),
            format!("GPRINT:{name}:LAST: Current\\: {format}{unit}\\r"),
        ])
    }

    /// Current / min / average / max summary for `name`, ending with `terminator`.
    pub fn range_summary(self, name: &str, format: &str, terminator: &str) -> Self {
        self.lines([
            format!("GPRINT:{name}:LAST:   Current\\: {format}"),
            format!("GPRINT:{name}:MIN:  Min\\: {format}"),
            format!("GPRINT:{name}:AVERAGE: Avg\\: {format}"),
            format!("GPRINT:{name}:MAX:  Max\\: {format}{terminator}"),
        ])
    }

    /// Finish with the zero rule and return all directives.
    pub fn build(self) -> Vec<String> {
        let mut lines = vec![
            "-s -1{period}".to_string(),
            format!("-t {}", self.title),
            "--lazy".to_string(),
            "-h".to_string(),
            self.height.to_string(),
            "-w".to_string(),
            self.width.to_string(),
            "-l 0".to_string(),
            "-a".to_string(),
            "PNG".to_string(),
            format!("-v {}", self.vertical_label),
        ];
        lines.extend(self.body);
        lines.push("HRULE:0#000000".to_string());
        lines
    }
}
