//! Glyph lookup for the terminal renderer
//!
//! Geometry never branches on style. The rasterizer asks a [`GlyphStyle`]
//! which character marks a data point, which character a stroke uses and
//! which character fills a cell below the line. Only blocks fill: below a
//! data point the shade depends on the distance, below a stroke it is flat.

use std::{fmt, str};

use serde::{Deserialize, Serialize};

/// Cells a stroke may overwrite: blank, and the far fill.
const OVERWRITABLE: [char; 2] = [' ', '░'];
/// The far fill, also used under every stroke.
const FAR_FILL: char = '░';

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown glyph style '{0}', expected one of blocks, ascii, braille, dots, lean")]
/// Returned when a glyph style name is not recognised.
pub struct UnknownStyle(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Character set used to draw the terminal chart.
pub enum GlyphStyle {
    /// Solid blocks with a shaded area fill.
    #[default]
    Blocks,
    /// Box-drawing line segments.
    Ascii,
    /// Full braille cells at data points, box-drawing strokes between them.
    Braille,
    /// Braille dots.
    Dots,
    /// Colons throughout.
    Lean,
}

impl GlyphStyle {
    /// Every style, in cycling order.
    pub const ALL: [GlyphStyle; 5] = [
        GlyphStyle::Blocks,
        GlyphStyle::Lean,
        GlyphStyle::Ascii,
        GlyphStyle::Dots,
        GlyphStyle::Braille,
    ];

    /// The style after this one in [`GlyphStyle::ALL`], wrapping.
    #[must_use]
    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|s| *s == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }

    /// The configuration name of this style.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            GlyphStyle::Blocks => "blocks",
            GlyphStyle::Ascii => "ascii",
            GlyphStyle::Braille => "braille",
            GlyphStyle::Dots => "dots",
            GlyphStyle::Lean => "lean",
        }
    }

    /// Glyph marking a data point.
    #[must_use]
    pub fn point(self) -> char {
        match self {
            GlyphStyle::Blocks => '█',
            GlyphStyle::Ascii => '●',
            GlyphStyle::Braille => '⣿',
            GlyphStyle::Dots => '⡇',
            GlyphStyle::Lean => ':',
        }
    }

    /// Glyph for a cell on the line between two data points. `dx`/`dy` are
    /// the absolute extents of the segment, `descending` is true when x and y
    /// step in the same direction (screen rows grow downward).
    #[must_use]
    pub fn stroke(self, dx: usize, dy: usize, descending: bool) -> char {
        match self {
            GlyphStyle::Ascii | GlyphStyle::Braille => {
                if dx > dy * 2 {
                    '─'
                } else if dy > dx * 2 {
                    '│'
                } else if descending {
                    '\\'
                } else {
                    '/'
                }
            }
            other => other.point(),
        }
    }

    /// Glyph for a cell `distance` rows below a data point, `None` if the
    /// style draws no area fill.
    #[must_use]
    pub fn fill(self, distance: usize) -> Option<char> {
        match self {
            GlyphStyle::Blocks => Some(match distance {
                1 => '▀',
                2 => '▄',
                _ => FAR_FILL,
            }),
            GlyphStyle::Ascii | GlyphStyle::Braille | GlyphStyle::Dots | GlyphStyle::Lean => None,
        }
    }

    /// Glyph for every cell below a stroke, `None` if the style draws no
    /// area fill.
    #[must_use]
    pub fn stroke_fill(self) -> Option<char> {
        self.fill(usize::MAX)
    }

    /// `true` if a stroke may be drawn over `cell`.
    #[must_use]
    pub fn overwritable(cell: char) -> bool {
        OVERWRITABLE.contains(&cell)
    }
}

impl fmt::Display for GlyphStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl str::FromStr for GlyphStyle {
    type Err = UnknownStyle;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|style| style.name().eq_ignore_ascii_case(input))
            .ok_or_else(|| UnknownStyle(input.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_visits_every_style() {
        let mut style = GlyphStyle::default();
        let mut seen = Vec::new();
        for _ in 0..GlyphStyle::ALL.len() {
            seen.push(style);
            style = style.next();
        }
        assert_eq!(style, GlyphStyle::default());
        for s in GlyphStyle::ALL {
            assert!(seen.contains(&s));
        }
    }

    #[test]
    fn parse_and_display_agree() {
        for style in GlyphStyle::ALL {
            assert_eq!(style.to_string().parse::<GlyphStyle>(), Ok(style));
        }
        assert_eq!("LEAN".parse::<GlyphStyle>(), Ok(GlyphStyle::Lean));
        assert!("sparkle".parse::<GlyphStyle>().is_err());
    }

    #[test]
    fn fill_by_distance() {
        assert_eq!(GlyphStyle::Blocks.fill(1), Some('▀'));
        assert_eq!(GlyphStyle::Blocks.fill(2), Some('▄'));
        assert_eq!(GlyphStyle::Blocks.fill(7), Some('░'));
        assert_eq!(GlyphStyle::Blocks.stroke_fill(), Some('░'));
        for style in [GlyphStyle::Ascii, GlyphStyle::Braille, GlyphStyle::Dots, GlyphStyle::Lean] {
            assert_eq!(style.fill(1), None);
            assert_eq!(style.stroke_fill(), None);
        }
    }

    #[test]
    fn ascii_strokes_follow_slope() {
        let style = GlyphStyle::Ascii;
        assert_eq!(style.stroke(10, 1, true), '─');
        assert_eq!(style.stroke(1, 10, true), '│');
        assert_eq!(style.stroke(3, 3, true), '\\');
        assert_eq!(style.stroke(3, 3, false), '/');
        assert_eq!(GlyphStyle::Braille.stroke(3, 3, false), '/');
        assert_eq!(GlyphStyle::Blocks.stroke(3, 3, false), '█');
        assert_eq!(GlyphStyle::Lean.stroke(10, 1, true), ':');
    }

    #[test]
    fn strokes_only_overwrite_blank_and_far_fill() {
        assert!(GlyphStyle::overwritable(' '));
        assert!(GlyphStyle::overwritable('░'));
        assert!(!GlyphStyle::overwritable('▀'));
        assert!(!GlyphStyle::overwritable('█'));
    }
}
