use std::env;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Quiet,
    Info,
    Debug,
}

static LEVEL: OnceLock<Level> = OnceLock::new();

fn parse_level(raw: &str) -> Option<Level> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "quiet" | "off" | "0" => Some(Level::Quiet),
        "info" | "1" | "" => Some(Level::Info),
        "debug" | "trace" | "2" => Some(Level::Debug),
        _ => None,
    }
}

pub fn level() -> Level {
    *LEVEL.get_or_init(|| {
        env::var("CRUX_LOG")
            .ok()
            .and_then(|v| parse_level(&v))
            .unwrap_or(Level::Info)
    })
}

pub fn progress(message: &str) {
    if level() >= Level::Info {
        eprintln!("{message}");
    }
}

pub fn debug(message: &str) {
    if level() >= Level::Debug {
        eprintln!("debug: {message}");
    }
}

/// One token per value: whitespace runs become `_`, `=` becomes `:` so a
/// value cannot forge another key, and anything non-printable is dropped.
fn sanitize_value(value: &str) -> String {
    let words: Vec<String> = value
        .split_ascii_whitespace()
        .map(|word| {
            word.chars()
                .filter(char::is_ascii_graphic)
                .map(|c| if c == '=' { ':' } else { c })
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect();
    if words.is_empty() {
        "-".to_string()
    } else {
        words.join("_")
    }
}

pub struct WarnEvent<'a> {
    pub code: &'a str,
    pub scope: &'a str,
    pub month: &'a str,
    pub path: &'a str,
    pub reason: &'a str,
}

pub fn format_warn(event: &WarnEvent<'_>) -> String {
    format!(
        "CRUX_WARN code={} scope={} month={} path={} reason={}",
        sanitize_value(event.code),
        sanitize_value(event.scope),
        sanitize_value(event.month),
        sanitize_value(event.path),
        sanitize_value(event.reason),
    )
}

/// Warnings are printed even in quiet mode.
pub fn warn(event: WarnEvent<'_>) {
    eprintln!("{}", format_warn(&event));
}

#[cfg(test)]
mod tests {
    use super::{Level, WarnEvent, format_warn, parse_level, sanitize_value};

    #[test]
    fn empty_month_reason_becomes_one_token() {
        let line = format_warn(&WarnEvent {
            code: "EMPTY_MONTH",
            scope: "country",
            month: "202402",
            path: "",
            reason: "  query returned\tno rows\n",
        });
        assert_eq!(
            line,
            "CRUX_WARN code=EMPTY_MONTH scope=country month=202402 path=- reason=query_returned_no_rows"
        );
    }

    #[test]
    fn values_cannot_forge_extra_keys() {
        assert_eq!(
            sanitize_value("/data/x month=209901/202305.csv"),
            "/data/x_month:209901/202305.csv"
        );
        assert_eq!(sanitize_value("caf\u{e9} \u{1b}[0m"), "caf_[0m");
    }

    #[test]
    fn level_names_parse() {
        assert_eq!(parse_level("QUIET"), Some(Level::Quiet));
        assert_eq!(parse_level("debug"), Some(Level::Debug));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn warn_line_is_single_line_key_value() {
        let line = format_warn(&WarnEvent {
            code: "ORPHAN_PLAIN_FILE",
            scope: "global",
            month: "202305",
            path: "/data/global/202305.csv",
            reason: "plain file without compressed sibling",
        });
        assert_eq!(
            line,
            "CRUX_WARN code=ORPHAN_PLAIN_FILE scope=global month=202305 path=/data/global/202305.csv reason=plain_file_without_compressed_sibling"
        );
    }
}
