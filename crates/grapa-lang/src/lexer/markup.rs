use super::error::LexError;

/// Replaces character and entity references in markup text.
///
/// Unknown entities are left in place and reported.
pub fn replace_entities(text: &[u8], offset: usize, errors: &mut Vec<LexError>) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut i = 0;

    while i < text.len() {
        if text[i] != b'&' {
            out.push(text[i]);
            i += 1;
            continue;
        }

        let Some(len) = text[i + 1..].iter().take(10).position(|b| *b == b';') else {
            out.push(b'&');
            i += 1;
            continue;
        };

        let entity = String::from_utf8_lossy(&text[i + 1..i + 1 + len]).to_string();
        match resolve(&entity) {
            Some(c) => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
            None => {
                errors.push(LexError::UnknownEntity {
                    entity,
                    offset: offset + i,
                });
                out.extend_from_slice(&text[i..i + len + 2]);
            }
        }
        i += len + 2;
    }

    out
}

fn resolve(entity: &str) -> Option<char> {
    match entity {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let code = entity.strip_prefix('#')?;
            let value = match code.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse::<u32>().ok()?,
            };
            char::from_u32(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::named("a &lt; b &amp;&amp; c", "a < b && c")]
    #[case::decimal("&#65;&#66;", "AB")]
    #[case::hex("&#x263A;", "\u{263a}")]
    #[case::bare_ampersand("fish & chips", "fish & chips")]
    fn test_replace_entities(#[case] input: &str, #[case] expected: &str) {
        let mut errors = Vec::new();
        let out = replace_entities(input.as_bytes(), 0, &mut errors);
        assert_eq!(String::from_utf8(out).unwrap(), expected);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_unknown_entity_is_kept() {
        let mut errors = Vec::new();
        let out = replace_entities(b"x &bogus; y", 10, &mut errors);
        assert_eq!(out, b"x &bogus; y");
        assert_eq!(
            errors,
            vec![LexError::UnknownEntity {
                entity: "bogus".to_string(),
                offset: 12
            }]
        );
    }
}
