//! ANSI SGR to inline-styled HTML.
//!
//! Log text is untrusted: every literal character goes through [`escape`]
//! before it is written, and the only tags emitted are our own `<span>`s.

use std::fmt::Write;

const ESC: char = '\u{1b}';
const BEL: char = '\u{7}';

/// Base 16 colours, normal then bright.
const PALETTE: [(u8, u8, u8); 16] = [
    (0, 0, 0),
    (187, 0, 0),
    (0, 187, 0),
    (187, 187, 0),
    (0, 0, 187),
    (187, 0, 187),
    (0, 187, 187),
    (255, 255, 255),
    (85, 85, 85),
    (255, 85, 85),
    (0, 255, 0),
    (255, 255, 85),
    (85, 85, 255),
    (255, 85, 255),
    (85, 255, 255),
    (255, 255, 255),
];

const CUBE_LEVELS: [u8; 6] = [0, 95, 135, 175, 215, 255];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Style {
    bold: bool,
    faint: bool,
    italic: bool,
    underline: bool,
    inverse: bool,
    fg: Option<(u8, u8, u8)>,
    bg: Option<(u8, u8, u8)>,
}

impl Style {
    fn is_plain(&self) -> bool {
        *self == Style::default()
    }

    fn css(&self) -> String {
        let (fg, bg) = if self.inverse {
            (
                Some(self.bg.unwrap_or(PALETTE[0])),
                Some(self.fg.unwrap_or(PALETTE[7])),
            )
        } else {
            (self.fg, self.bg)
        };

        let mut css = String::new();
        if let Some((r, g, b)) = fg {
            let _ = write!(css, "color:rgb({},{},{});", r, g, b);
        }
        if let Some((r, g, b)) = bg {
            let _ = write!(css, "background-color:rgb({},{},{});", r, g, b);
        }
        if self.bold {
            css.push_str("font-weight:bold;");
        }
        if self.faint {
            css.push_str("opacity:0.7;");
        }
        if self.italic {
            css.push_str("font-style:italic;");
        }
        if self.underline {
            css.push_str("text-decoration:underline;");
        }
        css
    }

    fn apply(&mut self, params: &[u16]) {
        if params.is_empty() {
            *self = Style::default();
            return;
        }

        let mut i = 0;
        while i < params.len() {
            match params[i] {
                0 => *self = Style::default(),
                1 => self.bold = true,
                2 => self.faint = true,
                3 => self.italic = true,
                4 => self.underline = true,
                7 => self.inverse = true,
                22 => {
                    self.bold = false;
                    self.faint = false;
                }
                23 => self.italic = false,
                24 => self.underline = false,
                27 => self.inverse = false,
                n @ 30..=37 => self.fg = Some(PALETTE[(n - 30) as usize]),
                39 => self.fg = None,
                n @ 40..=47 => self.bg = Some(PALETTE[(n - 40) as usize]),
                49 => self.bg = None,
                n @ 90..=97 => self.fg = Some(PALETTE[(n - 90 + 8) as usize]),
                n @ 100..=107 => self.bg = Some(PALETTE[(n - 100 + 8) as usize]),
                n @ (38 | 48) => {
                    let (colour, used) = extended_colour(&params[i + 1..]);
                    i += used;
                    if let Some(c) = colour {
                        if n == 38 {
                            self.fg = Some(c);
                        } else {
                            self.bg = Some(c);
                        }
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }
}

/// Parses the tail of a `38;...`/`48;...` sequence. Returns the colour and
/// how many parameters it consumed.
fn extended_colour(rest: &[u16]) -> (Option<(u8, u8, u8)>, usize) {
    match rest {
        [5, n, ..] => (palette_256(*n), 2),
        [2, r, g, b, ..] => (
            Some((clamp_u8(*r), clamp_u8(*g), clamp_u8(*b))),
            4,
        ),
        [5] => (None, 1),
        [2, ..] => (None, rest.len()),
        _ => (None, 0),
    }
}

fn clamp_u8(v: u16) -> u8 {
    v.min(255) as u8
}

fn palette_256(n: u16) -> Option<(u8, u8, u8)> {
    match n {
        0..=15 => Some(PALETTE[n as usize]),
        16..=231 => {
            let idx = n - 16;
            Some((
                CUBE_LEVELS[(idx / 36) as usize],
                CUBE_LEVELS[((idx / 6) % 6) as usize],
                CUBE_LEVELS[(idx % 6) as usize],
            ))
        }
        232..=255 => {
            let grey = (8 + (n - 232) * 10) as u8;
            Some((grey, grey, grey))
        }
        _ => None,
    }
}

pub fn escape(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
}

/// Converts text carrying ANSI escapes into HTML safe to inject as markup.
pub fn to_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    let mut style = Style::default();
    let mut open = false;
    let mut pending = Style::default();

    let mut chars = text.char_indices().peekable();
    let mut run_start = 0;

    while let Some((idx, c)) = chars.next() {
        if c != ESC {
            continue;
        }

        // Flush literal text preceding the escape with the style in force.
        if idx > run_start {
            write_run(&mut out, &text[run_start..idx], &mut style, pending, &mut open);
        }

        match chars.peek().map(|&(_, c)| c) {
            Some('[') => {
                chars.next();
                let mut params = String::new();
                let mut final_byte = None;
                for (_, c) in chars.by_ref() {
                    if ('\u{40}'..='\u{7e}').contains(&c) {
                        final_byte = Some(c);
                        break;
                    }
                    params.push(c);
                }
                if final_byte == Some('m') {
                    if let Some(codes) = parse_params(&params) {
                        pending.apply(&codes);
                    }
                }
            }
            Some(']') => {
                chars.next();
                while let Some((_, c)) = chars.next() {
                    if c == BEL {
                        break;
                    }
                    if c == ESC && chars.peek().map(|&(_, c)| c) == Some('\\') {
                        chars.next();
                        break;
                    }
                }
            }
            Some('(' | ')' | '*' | '+') => {
                // charset designation, ESC ( B
                chars.next();
                chars.next();
            }
            Some(_) => {
                chars.next();
            }
            None => {}
        }

        run_start = chars.peek().map(|&(i, _)| i).unwrap_or(text.len());
    }

    if run_start < text.len() {
        write_run(&mut out, &text[run_start..], &mut style, pending, &mut open);
    }
    if open {
        out.push_str("</span>");
    }
    out
}

fn write_run(out: &mut String, run: &str, current: &mut Style, wanted: Style, open: &mut bool) {
    if *current != wanted || (!*open && !wanted.is_plain()) {
        if *open {
            out.push_str("</span>");
            *open = false;
        }
        if !wanted.is_plain() {
            let _ = write!(out, "<span style=\"{}\">", wanted.css());
            *open = true;
        }
        *current = wanted;
    }
    escape(run, out);
}

/// `None` for private-mode or otherwise non-numeric parameter strings.
fn parse_params(params: &str) -> Option<Vec<u16>> {
    if params.is_empty() {
        return Some(Vec::new());
    }
    params
        .split([';', ':'])
        .map(|p| {
            if p.is_empty() {
                Some(0)
            } else {
                p.parse::<u16>().ok()
            }
        })
        .collect()
}
