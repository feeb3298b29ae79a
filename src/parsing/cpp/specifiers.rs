//! Reflection macro argument parsing.
//!
//! `EditAnywhere, Category="Game", meta=(ClampMin=0, DisplayName="Speed")`
//! becomes an ordered map: flags map to `"true"`, key/value pairs keep the
//! unquoted value, and `meta=(...)` entries flatten to `meta.<Key>`.

use super::decl::split_top_level;
use crate::types::Specifiers;

pub fn parse_specifiers(args: &str) -> Specifiers {
    let mut specs = Specifiers::new();
    collect_into(&mut specs, args, "");
    specs
}

fn collect_into(specs: &mut Specifiers, args: &str, prefix: &str) {
    for item in split_top_level(args, ',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        match find_top_level_eq(item) {
            Some(pos) => {
                let key = item[..pos].trim();
                let value = item[pos + 1..].trim();
                if key.eq_ignore_ascii_case("meta") && value.starts_with('(') && value.ends_with(')') {
                    let nested = format!("{prefix}{key}.");
                    collect_into(specs, &value[1..value.len() - 1], &nested);
                } else {
                    specs.insert(format!("{prefix}{key}"), unquote(value));
                }
            }
            None => {
                specs.insert(format!("{prefix}{item}"), "true".to_string());
            }
        }
    }
}

fn find_top_level_eq(item: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut prev = '\0';
    for (idx, c) in item.char_indices() {
        match c {
            '"' if prev != '\\' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => depth -= 1,
            '=' if !in_string && depth == 0 => return Some(idx),
            _ => {}
        }
        prev = c;
    }
    None
}

fn unquote(value: &str) -> String {
    let v = value.trim();
    let v = v
        .strip_prefix("TEXT(")
        .and_then(|s| s.strip_suffix(')'))
        .map(str::trim)
        .unwrap_or(v);
    if v.len() >= 2 && v.starts_with('"') && v.ends_with('"') {
        v[1..v.len() - 1].replace("\\\"", "\"")
    } else {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_and_key_values() {
        let specs = parse_specifiers(r#"EditAnywhere, BlueprintReadWrite, Category="Game""#);
        assert_eq!(specs.get("EditAnywhere").map(String::as_str), Some("true"));
        assert_eq!(specs.get("BlueprintReadWrite").map(String::as_str), Some("true"));
        assert_eq!(specs.get("Category").map(String::as_str), Some("Game"));
        let keys: Vec<&str> = specs.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["EditAnywhere", "BlueprintReadWrite", "Category"]);
    }

    #[test]
    fn meta_entries_are_flattened() {
        let specs = parse_specifiers(
            r#"BlueprintCallable, meta=(DisplayName="Do, Things", ClampMin=0, HideSelfPin)"#,
        );
        assert_eq!(specs.get("meta.DisplayName").map(String::as_str), Some("Do, Things"));
        assert_eq!(specs.get("meta.ClampMin").map(String::as_str), Some("0"));
        assert_eq!(specs.get("meta.HideSelfPin").map(String::as_str), Some("true"));
    }

    #[test]
    fn empty_args_give_empty_map() {
        assert!(parse_specifiers("").is_empty());
        assert!(parse_specifiers("  ").is_empty());
    }
}
