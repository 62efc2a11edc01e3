use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub const DB_USER: &str = "DB_USER";
pub const DB_PASSWORD: &str = "DB_PASSWORD";

/// Constants declared in a PHP source file through `define(NAME, VALUE)`.
///
/// Only the first declaration of a name is kept, so a later redefinition
/// (for example inside an `if (!defined(...))` block) never shadows it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigConstants {
    values: BTreeMap<String, String>,
}

impl ConfigConstants {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Value of `name`, or an empty string when the constant is not declared.
    pub fn get_or_empty(&self, name: &str) -> String {
        self.get(name).unwrap_or_default().to_string()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    fn insert_first(&mut self, name: String, value: String) {
        self.values.entry(name).or_insert(value);
    }
}

/// Read `path` and collect every `define` declaration in it.
/// Invalid UTF-8 is decoded lossily.
pub fn read_config_constants(path: &Path) -> Result<ConfigConstants> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(parse_php_defines(&String::from_utf8_lossy(&bytes)))
}

/// Look up a single constant in the file at `path`.
pub fn extract_constant(path: &Path, name: &str) -> Result<Option<String>> {
    let constants = read_config_constants(path)?;
    Ok(constants.get(name).map(str::to_string))
}

pub fn parse_php_defines(source: &str) -> ConfigConstants {
    let chars: Vec<char> = source.chars().collect();
    let mut scanner = Scanner {
        chars: &chars,
        pos: 0,
    };
    let mut constants = ConfigConstants::default();

    while let Some(ch) = scanner.peek() {
        match ch {
            '/' if scanner.peek_at(1) == Some('/') => scanner.skip_line(),
            '/' if scanner.peek_at(1) == Some('*') => scanner.skip_block_comment(),
            '#' => scanner.skip_line(),
            '\'' | '"' => {
                let _ = scanner.read_string();
            }
            ch if is_identifier_start(ch) => {
                let start = scanner.pos;
                let identifier = scanner.read_identifier();
                if !identifier.eq_ignore_ascii_case("define") || scanner.is_member_access(start) {
                    continue;
                }
                let resume_at = scanner.pos;
                match scanner.read_define_arguments() {
                    Some((name, value)) => constants.insert_first(name, value),
                    None => scanner.pos = resume_at,
                }
            }
            _ => scanner.pos += 1,
        }
    }

    constants
}

struct Scanner<'a> {
    chars: &'a [char],
    pos: usize,
}

impl Scanner<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // `$define(`, `->define(` and `::define(` are not the builtin.
    fn is_member_access(&self, start: usize) -> bool {
        start > 0 && matches!(self.chars[start - 1], '$' | '>' | ':')
    }

    fn skip_line(&mut self) {
        while let Some(ch) = self.bump() {
            if ch == '\n' {
                break;
            }
        }
    }

    fn skip_block_comment(&mut self) {
        self.pos += 2;
        while let Some(ch) = self.bump() {
            if ch == '*' && self.eat('/') {
                break;
            }
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(ch) if ch.is_whitespace() => self.pos += 1,
                Some('/') if self.peek_at(1) == Some('/') => self.skip_line(),
                Some('/') if self.peek_at(1) == Some('*') => self.skip_block_comment(),
                Some('#') => self.skip_line(),
                _ => break,
            }
        }
    }

    fn read_identifier(&mut self) -> String {
        let mut out = String::new();
        while let Some(ch) = self.peek() {
            if !is_identifier_continue(ch) {
                break;
            }
            out.push(ch);
            self.pos += 1;
        }
        out
    }

    /// Parses `( NAME , VALUE` up to the closing `)` or the optional third
    /// argument. Returns `None` when the call does not have that shape.
    fn read_define_arguments(&mut self) -> Option<(String, String)> {
        self.skip_trivia();
        if !self.eat('(') {
            return None;
        }
        self.skip_trivia();
        if !matches!(self.peek(), Some('\'' | '"')) {
            return None;
        }
        let name = self.read_string()?;
        self.skip_trivia();
        if !self.eat(',') {
            return None;
        }
        self.skip_trivia();
        let value = match self.peek() {
            Some('\'' | '"') => self.read_string()?,
            _ => self.read_scalar()?,
        };
        self.skip_trivia();
        match self.peek() {
            Some(')' | ',') => Some((name, value)),
            _ => None,
        }
    }

    fn read_scalar(&mut self) -> Option<String> {
        let mut out = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() || matches!(ch, ',' | ')' | ';' | '#') {
                break;
            }
            if ch == '/' && matches!(self.peek_at(1), Some('/' | '*')) {
                break;
            }
            out.push(ch);
            self.pos += 1;
        }
        if out.is_empty() { None } else { Some(out) }
    }

    /// Reads a quoted literal starting at the opening quote. Returns `None`
    /// when the literal is not terminated before end of input.
    fn read_string(&mut self) -> Option<String> {
        let quote = self.bump()?;
        let mut out = String::new();
        while let Some(ch) = self.bump() {
            if ch == quote {
                return Some(out);
            }
            if ch != '\\' {
                out.push(ch);
                continue;
            }
            let Some(next) = self.bump() else {
                break;
            };
            match (quote, next) {
                (_, '\\') => out.push('\\'),
                (quote, next) if next == quote => out.push(next),
                ('"', 'n') => out.push('\n'),
                ('"', 'r') => out.push('\r'),
                ('"', 't') => out.push('\t'),
                ('"', 'v') => out.push('\u{0B}'),
                ('"', 'e') => out.push('\u{1B}'),
                ('"', 'f') => out.push('\u{0C}'),
                ('"', '$') => out.push('$'),
                _ => {
                    out.push('\\');
                    out.push(next);
                }
            }
        }
        None
    }
}

fn is_identifier_start(ch: char) -> bool {
    ch == '_' || ch.is_alphabetic()
}

fn is_identifier_continue(ch: char) -> bool {
    ch == '_' || ch.is_alphanumeric()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    const WP_CONFIG: &str = r#"<?php
/**
 * The base configuration for WordPress
 */

// ** MySQL settings - You can get this info from your web host ** //
/** The name of the database for WordPress */
define( 'DB_NAME', 'wordpress_blog' );

/** MySQL database username */
define( 'DB_USER', 'root' );

/** MySQL database password */
define( 'DB_PASSWORD', 'secret' );

define( 'DB_HOST', 'localhost' );
define( 'DB_CHARSET', 'utf8mb4' );

$table_prefix = 'wp_';

define( 'WP_DEBUG', false );

if ( ! defined( 'ABSPATH' ) ) {
	define( 'ABSPATH', __DIR__ . '/' );
}

require_once ABSPATH . 'wp-settings.php';
"#;

    #[test]
    fn parses_wordpress_config() {
        let constants = parse_php_defines(WP_CONFIG);
        assert_eq!(constants.get(DB_USER), Some("root"));
        assert_eq!(constants.get(DB_PASSWORD), Some("secret"));
        assert_eq!(constants.get("DB_NAME"), Some("wordpress_blog"));
        assert_eq!(constants.get("WP_DEBUG"), Some("false"));
        assert_eq!(constants.get("ABSPATH"), None);
    }

    #[test]
    fn quote_style_does_not_change_values() {
        for source in [
            "define('DB_USER','x'); define('DB_PASSWORD','y');",
            "define(\"DB_USER\",\"x\"); define(\"DB_PASSWORD\",\"y\");",
            "define('DB_USER', \"x\");\ndefine(\"DB_PASSWORD\", 'y');",
        ] {
            let constants = parse_php_defines(source);
            assert_eq!(constants.get(DB_USER), Some("x"), "source: {source}");
            assert_eq!(constants.get(DB_PASSWORD), Some("y"), "source: {source}");
        }
    }

    #[test]
    fn honours_escapes_in_both_quote_styles() {
        let constants = parse_php_defines(
            r#"define("DB_PASSWORD", "pa\"ss\\word\n");
define('DB_USER', 'it\'s');
define('RAW', 'keep\n\"');"#,
        );
        assert_eq!(constants.get(DB_PASSWORD), Some("pa\"ss\\word\n"));
        assert_eq!(constants.get(DB_USER), Some("it's"));
        assert_eq!(constants.get("RAW"), Some("keep\\n\\\""));
    }

    #[test]
    fn ignores_commented_out_declarations() {
        let constants = parse_php_defines(
            "// define('DB_USER', 'line');\n# define('DB_USER', 'hash');\n/* define('DB_USER', 'block');\n define('DB_PASSWORD', 'block'); */\ndefine('DB_USER', 'live');\n",
        );
        assert_eq!(constants.get(DB_USER), Some("live"));
        assert_eq!(constants.get(DB_PASSWORD), None);
    }

    #[test]
    fn first_declaration_wins() {
        let constants =
            parse_php_defines("define('DB_USER', 'first');\ndefine('DB_USER', 'second');\n");
        assert_eq!(constants.get(DB_USER), Some("first"));
        assert_eq!(constants.len(), 1);
    }

    #[test]
    fn accepts_whitespace_and_newlines_between_tokens() {
        let constants = parse_php_defines(
            "DEFINE (\n  'DB_USER' /* user */ ,\n  'spaced'\n) ;\ndefine('DB_PASSWORD', 'p', true);",
        );
        assert_eq!(constants.get(DB_USER), Some("spaced"));
        assert_eq!(constants.get(DB_PASSWORD), Some("p"));
    }

    #[test]
    fn unquoted_scalars_keep_their_source_text() {
        let constants =
            parse_php_defines("define('WP_MEMORY', 256); define('RATIO', -1.5); define('ON', TRUE);");
        assert_eq!(constants.get("WP_MEMORY"), Some("256"));
        assert_eq!(constants.get("RATIO"), Some("-1.5"));
        assert_eq!(constants.get("ON"), Some("TRUE"));
    }

    #[test]
    fn skips_defines_inside_strings_and_member_calls() {
        let constants = parse_php_defines(
            "echo \"define('DB_USER', 'fake')\";\n$obj->define('DB_USER', 'method');\nConfig::define('DB_USER', 'static');\ndefine('DB_USER', 'real');",
        );
        assert_eq!(constants.get(DB_USER), Some("real"));
    }

    #[test]
    fn malformed_declarations_do_not_stop_the_scan() {
        let constants = parse_php_defines(
            "define('DB_USER');\ndefine(DB_PASSWORD, 'bare');\ndefine('DB_HOST', 'a' . 'b');\ndefine('DB_USER', 'ok');\ndefine('DB_PASSWORD', 'unterminated",
        );
        assert_eq!(constants.get(DB_USER), Some("ok"));
        assert_eq!(constants.get(DB_PASSWORD), None);
        assert_eq!(constants.get("DB_HOST"), None);
    }

    #[test]
    fn missing_constant_reads_as_empty() {
        let constants = parse_php_defines("define('DB_USER', 'root');");
        assert_eq!(constants.get_or_empty(DB_PASSWORD), "");
        assert_eq!(constants.get_or_empty(DB_USER), "root");
    }

    #[test]
    fn reads_constants_from_file() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("wp-config.php");
        fs::write(&path, WP_CONFIG).expect("write config");

        assert_eq!(
            extract_constant(&path, DB_USER).expect("extract"),
            Some("root".to_string())
        );
        assert_eq!(extract_constant(&path, "DB_MISSING").expect("extract"), None);

        let constants = read_config_constants(&path).expect("read");
        let names: Vec<&str> = constants.iter().map(|(name, _)| name).collect();
        assert!(names.contains(&"DB_HOST"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let temp = tempdir().expect("tempdir");
        let error = read_config_constants(&temp.path().join("wp-config.php")).expect_err("must fail");
        assert!(error.to_string().contains("failed to read"));
    }
}
