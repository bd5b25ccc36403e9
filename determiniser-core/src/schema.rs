use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Field names recovered from a host draw routine's source text.
///
/// `array_field`, `value_field` and `count_field` are the minimum the
/// optimized paths need. The wrapper and total names are optional and get
/// re-checked at every use site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrawSchema {
    pub wrapper: Option<String>,
    pub array_field: String,
    pub value_field: String,
    pub count_field: String,
    pub total_field: Option<String>,
}

// The one shape this matcher understands:
//
//     return W(b.items[i].value)
//
// a wrapped read of the selected entry's value field. Identifier characters
// follow the source grammar of a minified bundle, '$' included.
static RETURN_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"return\s+([A-Za-z_$][\w$]*)\s*\(\s*([A-Za-z_$][\w$]*)\.([A-Za-z_$][\w$]*)\s*\[\s*([A-Za-z_$][\w$]*)\s*\]\s*\.\s*([A-Za-z_$][\w$]*)\s*\)",
    )
    .expect("return shape pattern compiles")
});

/// Recovers a [`DrawSchema`] from a routine's literal source text.
///
/// Purely heuristic: it encodes an assumption about the host's
/// implementation idiom, not a contract. Any mismatch yields `None` and
/// callers degrade to invoking the host unmodified.
pub fn derive_schema(source: &str) -> Option<DrawSchema> {
    let caps = RETURN_SHAPE.captures(source)?;
    let wrapper = caps.get(1)?.as_str().to_string();
    let pool_var = regex::escape(caps.get(2)?.as_str());
    let array_field = caps.get(3)?.as_str().to_string();
    let index_var = regex::escape(caps.get(4)?.as_str());
    let value_field = caps.get(5)?.as_str().to_string();

    let entry = format!(
        r"{}\.{}\s*\[\s*{}\s*\]",
        pool_var,
        regex::escape(&array_field),
        index_var
    );

    // A surviving count decrement on the selected entry is the minimum
    // evidence needed to trust the rest of the shape.
    let count_field = first_capture(
        source,
        &[
            format!(r"--\s*{entry}\.([A-Za-z_$][\w$]*)"),
            format!(r"{entry}\.([A-Za-z_$][\w$]*)\s*--"),
        ],
    )?;

    // Minifiers emit the emptiness check either way round.
    let total_field = first_capture(
        source,
        &[
            format!(r"{pool_var}\.([A-Za-z_$][\w$]*)\s*===?\s*0"),
            format!(r"0\s*===?\s*{pool_var}\.([A-Za-z_$][\w$]*)"),
        ],
    );

    Some(DrawSchema {
        wrapper: Some(wrapper),
        array_field,
        value_field,
        count_field,
        total_field,
    })
}

fn first_capture(source: &str, patterns: &[String]) -> Option<String> {
    for pattern in patterns {
        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(_) => continue,
        };
        if let Some(m) = re.captures(source).and_then(|caps| caps.get(1)) {
            return Some(m.as_str().to_string());
        }
    }
    None
}
