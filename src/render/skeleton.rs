use serde::Deserialize;
use std::fmt;

const BAR: char = '░';

/// Placeholder layouts shown before data arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum SkeletonKind {
  #[default]
  Generic,
  Table,
  Cards,
  Dashboard,
}

impl SkeletonKind {
  /// Parse a skeleton name. Unknown names fall back to `Generic`.
  pub fn parse(name: &str) -> Self {
    match name.trim().to_lowercase().as_str() {
      "table" => Self::Table,
      "cards" => Self::Cards,
      "dashboard" => Self::Dashboard,
      _ => Self::Generic,
    }
  }

  pub fn name(&self) -> &'static str {
    match self {
      Self::Generic => "generic",
      Self::Table => "table",
      Self::Cards => "cards",
      Self::Dashboard => "dashboard",
    }
  }

  /// Render the placeholder as text.
  pub fn render(&self) -> String {
    match self {
      Self::Generic => [Width::Full, Width::Short, Width::Medium]
        .iter()
        .map(|w| bar(*w))
        .collect::<Vec<_>>()
        .join("\n"),
      Self::Table => {
        let header = row(4, Width::Short);
        let rows = (0..5).map(|_| row(4, Width::Medium));
        std::iter::once(header)
          .chain(rows)
          .collect::<Vec<_>>()
          .join("\n")
      }
      Self::Cards => cards(4, &[Width::Short, Width::Large, Width::Medium]),
      Self::Dashboard => cards(4, &[Width::Short, Width::Large]),
    }
  }
}

impl From<String> for SkeletonKind {
  fn from(name: String) -> Self {
    Self::parse(&name)
  }
}

impl fmt::Display for SkeletonKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[derive(Debug, Clone, Copy)]
enum Width {
  Short,
  Medium,
  Large,
  Full,
}

impl Width {
  fn chars(self) -> usize {
    match self {
      Width::Short => 6,
      Width::Medium => 12,
      Width::Large => 16,
      Width::Full => 24,
    }
  }
}

fn bar(width: Width) -> String {
  std::iter::repeat(BAR).take(width.chars()).collect()
}

fn row(cells: usize, width: Width) -> String {
  let cell = format!("{:<pad$}", bar(width), pad = Width::Medium.chars());
  vec![cell; cells].join(" │ ").trim_end().to_string()
}

/// Cards laid out side by side, one line per entry of `lines`.
fn cards(count: usize, lines: &[Width]) -> String {
  lines
    .iter()
    .map(|w| {
      let cell = format!("{:<pad$}", bar(*w), pad = Width::Large.chars());
      vec![cell; count].join("  ").trim_end().to_string()
    })
    .collect::<Vec<_>>()
    .join("\n")
}
