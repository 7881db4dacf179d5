use crate::config::TemplateEncoding;
use crate::extract::TemplateData;

/// Literal replacement of every key, in rule order, then output encoding.
pub(super) fn fill_text(template: &str, data: &TemplateData, encoding: TemplateEncoding) -> String {
    let mut text = template.to_string();
    for (key, value) in data {
        if key.is_empty() {
            continue;
        }
        if !text.contains(key.as_str()) {
            tracing::debug!(placeholder = %key, "placeholder not present in template");
            continue;
        }
        text = text.replace(key.as_str(), value);
    }
    encode(&text, encoding)
}

/// Escape code points the output encoding cannot represent as numeric
/// character references, so writing never fails.
fn encode(text: &str, encoding: TemplateEncoding) -> String {
    match encoding {
        TemplateEncoding::Utf8 => text.to_string(),
        TemplateEncoding::Ascii => {
            let mut out = String::with_capacity(text.len());
            for ch in text.chars() {
                if ch.is_ascii() {
                    out.push(ch);
                } else {
                    out.push_str(&format!("&#{};", u32::from(ch)));
                }
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, &str)]) -> TemplateData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn replaces_every_occurrence() {
        let filled = fill_text(
            "$a$ and $a$ then $b$",
            &data(&[("$a$", "x"), ("$b$", "y")]),
            TemplateEncoding::Utf8,
        );
        assert_eq!(filled, "x and x then y");
    }

    #[test]
    fn earlier_values_are_visible_to_later_keys() {
        let filled = fill_text(
            "$first$",
            &data(&[("$first$", "see $second$"), ("$second$", "done")]),
            TemplateEncoding::Utf8,
        );
        assert_eq!(filled, "see done");
    }

    #[test]
    fn utf8_output_is_untouched() {
        let filled = fill_text("$n$", &data(&[("$n$", "µg 😀")]), TemplateEncoding::Utf8);
        assert_eq!(filled, "µg 😀");
    }

    #[test]
    fn ascii_output_escapes_exotic_code_points() {
        let filled = fill_text("<b>$n$</b>", &data(&[("$n$", "µg 😀")]), TemplateEncoding::Ascii);
        assert_eq!(filled, "<b>&#181;g &#128512;</b>");
    }
}
