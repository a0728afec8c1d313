//! Minimal netrc parser
//!
//! Understands `machine`, `default`, `login`, `password` and `account`
//! tokens. `macdef` bodies are skipped up to the next blank line. Values may
//! be double-quoted to hold whitespace; inside quotes `\` escapes the next
//! character.

use std::path::{Path, PathBuf};

use crate::error::CredentialError;

/// One `machine` (or `default`) block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetrcEntry {
    /// `None` for the `default` entry
    pub machine: Option<String>,
    pub login: Option<String>,
    pub password: Option<String>,
    pub account: Option<String>,
}

/// Parsed netrc file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Netrc {
    entries: Vec<NetrcEntry>,
}

impl Netrc {
    /// Parse netrc text
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut entries: Vec<NetrcEntry> = Vec::new();
        let mut in_macdef = false;
        let mut pending_key: Option<String> = None;

        for line in text.lines() {
            if in_macdef {
                if line.trim().is_empty() {
                    in_macdef = false;
                }
                continue;
            }

            for token in tokenize(line)? {
                let token = token.as_str();
                if let Some(key) = pending_key.take() {
                    let entry = entries
                        .last_mut()
                        .ok_or_else(|| format!("'{}' outside of a machine entry", key))?;
                    match key.as_str() {
                        "machine" => entry.machine = Some(token.to_string()),
                        "login" => entry.login = Some(token.to_string()),
                        "password" => entry.password = Some(token.to_string()),
                        "account" => entry.account = Some(token.to_string()),
                        _ => {},
                    }
                    continue;
                }

                match token {
                    "machine" => {
                        entries.push(NetrcEntry::default());
                        pending_key = Some(token.to_string());
                    },
                    "default" => entries.push(NetrcEntry::default()),
                    "login" | "password" | "account" => pending_key = Some(token.to_string()),
                    "macdef" => {
                        // rest of this line is the macro name, body follows until a blank line
                        in_macdef = true;
                        break;
                    },
                    other if other.starts_with('#') => break,
                    other => return Err(format!("unexpected token '{}'", other)),
                }
            }
        }

        if let Some(key) = pending_key {
            return Err(format!("missing value after '{}'", key));
        }

        Ok(Self { entries })
    }

    /// Read and parse a netrc file
    pub fn from_file(path: &Path) -> Result<Self, CredentialError> {
        let text = std::fs::read_to_string(path).map_err(|source| CredentialError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|reason| CredentialError::Netrc {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// First entry for `host`, falling back to the `default` entry
    pub fn lookup(&self, host: &str) -> Option<&NetrcEntry> {
        self.entries
            .iter()
            .find(|e| e.machine.as_deref() == Some(host))
            .or_else(|| self.entries.iter().find(|e| e.machine.is_none()))
    }

    pub fn entries(&self) -> &[NetrcEntry] {
        &self.entries
    }
}

/// Split a line into whitespace-separated tokens, honouring double quotes
fn tokenize(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(first) = chars.next() else {
            break;
        };

        let mut token = String::new();
        if first == '"' {
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => token.extend(chars.next()),
                    Some(c) => token.push(c),
                    None => return Err("unterminated quoted token".to_string()),
                }
            }
        } else {
            token.push(first);
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                token.push(c);
            }
        }
        tokens.push(token);
    }

    Ok(tokens)
}

#[cfg(windows)]
const NETRC_FILE_NAME: &str = "_netrc";
#[cfg(not(windows))]
const NETRC_FILE_NAME: &str = ".netrc";

/// Candidate netrc locations in lookup order
pub fn candidate_paths(
    explicit: Option<&Path>,
    env_value: Option<&str>,
    cwd: Option<&Path>,
    home: Option<&Path>,
) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path.to_path_buf());
    }
    if let Some(value) = env_value.filter(|v| !v.is_empty()) {
        candidates.push(PathBuf::from(value));
    }
    if let Some(dir) = cwd {
        candidates.push(dir.join(NETRC_FILE_NAME));
    }
    if let Some(dir) = home {
        candidates.push(dir.join(NETRC_FILE_NAME));
    }
    candidates
}

/// Resolve the netrc file to use: explicit path, `NETRC`, working directory, home
pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
    let env_value = std::env::var("NETRC").ok();
    let cwd = std::env::current_dir().ok();
    let home = dirs::home_dir();
    candidate_paths(explicit, env_value.as_deref(), cwd.as_deref(), home.as_deref())
        .into_iter()
        .find(|p| p.is_file())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
machine broker.example.org login alice password s3cret
machine ftp.example.org
    login bob
    password hunter2
    account ignored

macdef init
cd /pub
machine not.a.real.entry

default login anonymous password guest@
";

    #[test]
    fn test_parse_entries() {
        let netrc = Netrc::parse(SAMPLE).unwrap();
        assert_eq!(netrc.entries().len(), 3);

        let broker = netrc.lookup("broker.example.org").unwrap();
        assert_eq!(broker.login.as_deref(), Some("alice"));
        assert_eq!(broker.password.as_deref(), Some("s3cret"));

        let ftp = netrc.lookup("ftp.example.org").unwrap();
        assert_eq!(ftp.login.as_deref(), Some("bob"));
        assert_eq!(ftp.account.as_deref(), Some("ignored"));
    }

    #[test]
    fn test_macdef_body_is_skipped() {
        let netrc = Netrc::parse(SAMPLE).unwrap();
        assert!(netrc
            .entries()
            .iter()
            .all(|e| e.machine.as_deref() != Some("not.a.real.entry")));
    }

    #[test]
    fn test_lookup_falls_back_to_default() {
        let netrc = Netrc::parse(SAMPLE).unwrap();
        let entry = netrc.lookup("elsewhere.example.org").unwrap();
        assert!(entry.machine.is_none());
        assert_eq!(entry.login.as_deref(), Some("anonymous"));
    }

    #[test]
    fn test_first_match_wins() {
        let netrc = Netrc::parse(
            "machine h login first password one\nmachine h login second password two\n",
        )
        .unwrap();
        assert_eq!(netrc.lookup("h").unwrap().login.as_deref(), Some("first"));
    }

    #[test]
    fn test_no_match_without_default() {
        let netrc = Netrc::parse("machine h login u password p").unwrap();
        assert!(netrc.lookup("other").is_none());
    }

    #[test]
    fn test_parse_errors() {
        assert!(Netrc::parse("login orphan").is_err());
        assert!(Netrc::parse("machine h login").is_err());
        assert!(Netrc::parse("machine h bogus x").is_err());
    }

    #[test]
    fn test_quoted_values() {
        let netrc = Netrc::parse(
            "machine h login \"data user\" password \"pa ss\\\"word\"\nmachine e login \"\" password x\n",
        )
        .unwrap();
        let entry = netrc.lookup("h").unwrap();
        assert_eq!(entry.login.as_deref(), Some("data user"));
        assert_eq!(entry.password.as_deref(), Some("pa ss\"word"));
        assert_eq!(netrc.lookup("e").unwrap().login.as_deref(), Some(""));

        assert!(Netrc::parse("machine h password \"open").is_err());
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("  a \"b c\"  d ").unwrap(), vec!["a", "b c", "d"]);
        assert!(tokenize("   ").unwrap().is_empty());
    }

    #[test]
    fn test_candidate_order() {
        let paths = candidate_paths(
            Some(Path::new("/explicit/netrc")),
            Some("/from/env"),
            Some(Path::new("/work")),
            Some(Path::new("/home/u")),
        );
        assert_eq!(paths[0], PathBuf::from("/explicit/netrc"));
        assert_eq!(paths[1], PathBuf::from("/from/env"));
        assert_eq!(paths[2], Path::new("/work").join(NETRC_FILE_NAME));
        assert_eq!(paths[3], Path::new("/home/u").join(NETRC_FILE_NAME));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netrc");
        std::fs::write(&path, SAMPLE).unwrap();
        let netrc = Netrc::from_file(&path).unwrap();
        assert!(netrc.lookup("ftp.example.org").is_some());

        assert!(Netrc::from_file(&dir.path().join("missing")).is_err());
    }
}
