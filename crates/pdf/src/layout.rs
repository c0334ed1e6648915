/// Courier glyphs are 600/1000 em wide.
const COURIER_ADVANCE: f32 = 0.6;
const LEADING: f32 = 1.25;

/// Body font sizes tried in order until the text fits.
pub const BODY_SIZES: [f32; 5] = [10.0, 9.0, 8.0, 7.0, 6.0];

/// The rectangle reserved for body text, in points.
#[derive(Debug, Clone, Copy)]
pub struct BodyArea {
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BodyLayout {
    pub font_size: f32,
    pub leading: f32,
    pub lines: Vec<String>,
}

/// Pick the largest body size at which `text` fits in `area`. Returns the
/// wrapped line count at the smallest size when nothing fits.
pub fn fit(text: &str, area: BodyArea) -> Result<BodyLayout, usize> {
    let mut last = 0;
    for font_size in BODY_SIZES {
        let columns = (area.width / (font_size * COURIER_ADVANCE)).floor() as usize;
        let leading = font_size * LEADING;
        let rows = (area.height / leading).floor() as usize;
        let lines = wrap(text, columns.max(1));
        if lines.len() <= rows {
            return Ok(BodyLayout { font_size, leading, lines });
        }
        last = lines.len();
    }
    Err(last)
}

/// Word-wrap to `columns` characters, keeping the user's line breaks and
/// hard-splitting words that are longer than a line.
pub fn wrap(text: &str, columns: usize) -> Vec<String> {
    let mut out = Vec::new();
    for paragraph in text.lines() {
        let mut line = String::new();
        let mut len = 0;
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > columns {
                if len > 0 {
                    out.push(std::mem::take(&mut line));
                    len = 0;
                }
                let rest = word.split_off(columns);
                out.push(word.into_iter().collect());
                word = rest;
            }
            if word.is_empty() {
                continue;
            }
            if len > 0 && len + 1 + word.len() > columns {
                out.push(std::mem::take(&mut line));
                len = 0;
            }
            if len > 0 {
                line.push(' ');
                len += 1;
            }
            len += word.len();
            line.extend(word);
        }
        out.push(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_line() {
        assert_eq!(wrap("Total: 42,00", 40), vec!["Total: 42,00"]);
    }

    #[test]
    fn wraps_on_word_boundaries() {
        assert_eq!(
            wrap("Main d'oeuvre 3 heures deplacement inclus", 16),
            vec!["Main d'oeuvre 3", "heures", "deplacement", "inclus"]
        );
    }

    #[test]
    fn keeps_explicit_line_breaks() {
        assert_eq!(wrap("Client: Dupont\n\nTotal: 42", 40), vec!["Client: Dupont", "", "Total: 42"]);
    }

    #[test]
    fn splits_overlong_words() {
        assert_eq!(wrap("ab 0123456789", 4), vec!["ab", "0123", "4567", "89"]);
    }

    #[test]
    fn empty_text_has_no_lines() {
        assert!(wrap("", 10).is_empty());
    }

    #[test]
    fn fit_prefers_largest_size() {
        let area = BodyArea { width: 483.0, height: 650.0 };
        let layout = fit("Total: 42,00", area).unwrap();
        assert_eq!(layout.font_size, 10.0);
        assert_eq!(layout.lines, vec!["Total: 42,00"]);
    }

    #[test]
    fn fit_shrinks_long_text() {
        let area = BodyArea { width: 483.0, height: 650.0 };
        // 60 rows fit at 8pt (650 / 10) but not at 9pt (650 / 11.25 = 57).
        let text = vec!["ligne"; 60].join("\n");
        assert_eq!(fit(&text, area).unwrap().font_size, 8.0);
    }

    #[test]
    fn fit_reports_overflow() {
        let area = BodyArea { width: 483.0, height: 100.0 };
        let text = vec!["ligne"; 200].join("\n");
        assert_eq!(fit(&text, area), Err(200));
    }
}
