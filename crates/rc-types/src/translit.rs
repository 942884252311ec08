/// Per-character Cyrillic-to-Latin transliteration used to derive a
/// filesystem- and console-safe alias from a raw agent id.
fn translit_char(lower: char) -> Option<&'static str> {
    Some(match lower {
        'а' => "a",
        'б' => "b",
        'в' => "v",
        'г' => "g",
        'д' => "d",
        'е' => "e",
        'ё' => "yo",
        'ж' => "zh",
        'з' => "z",
        'и' => "i",
        'й' => "y",
        'к' => "k",
        'л' => "l",
        'м' => "m",
        'н' => "n",
        'о' => "o",
        'п' => "p",
        'р' => "r",
        'с' => "s",
        'т' => "t",
        'у' => "u",
        'ф' => "f",
        'х' => "h",
        'ц' => "ts",
        'ч' => "ch",
        'ш' => "sh",
        'щ' => "sch",
        'ъ' => "",
        'ы' => "y",
        'ь' => "",
        'э' => "e",
        'ю' => "yu",
        'я' => "ya",
        _ => return None,
    })
}

/// Derives a display alias: transliterates Cyrillic letters to Latin,
/// capitalizing the result when the source letter was uppercase, and turns
/// whitespace into underscores. Non-Cyrillic characters pass through
/// unchanged.
pub fn transliterate(username: &str) -> String {
    let mut out = String::with_capacity(username.len());
    for ch in username.chars() {
        let lower = ch.to_lowercase().next().unwrap_or(ch);
        match translit_char(lower) {
            Some(trans) if !trans.is_empty() => {
                if ch.is_uppercase() {
                    let mut chars = trans.chars();
                    if let Some(first) = chars.next() {
                        out.push(first.to_ascii_uppercase());
                        out.push_str(chars.as_str());
                    }
                } else {
                    out.push_str(trans);
                }
            }
            Some(_) => {
                // ъ/ь transliterate to nothing.
            }
            None => out.push(ch),
        }
    }
    out.replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_ascii() {
        assert_eq!(transliterate("host-01"), "host-01");
    }

    #[test]
    fn lowercase_cyrillic() {
        assert_eq!(transliterate("привет"), "privet");
    }

    #[test]
    fn capitalizes_uppercase_first_letter() {
        assert_eq!(transliterate("Максим"), "Maksim");
    }

    #[test]
    fn whitespace_becomes_underscore() {
        assert_eq!(transliterate("офис 3"), "ofis_3");
    }

    #[test]
    fn soft_and_hard_signs_drop() {
        assert_eq!(transliterate("подъезд"), "podezd");
    }
}
