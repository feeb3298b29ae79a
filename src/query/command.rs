//! Query commands and their textual form.
//!
//! The text form is `<command> [--flag ...] <argument>`. Everything after
//! the flags is the argument, so symbol keys with spaces survive a round
//! trip (`source src:fn:Foo(const FString&, int32)`).

use crate::error::{QueryError, QueryResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    #[default]
    Summary,
    Details,
    Source,
}

impl DetailLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Details => "details",
            Self::Source => "source",
        }
    }
}

impl fmt::Display for DetailLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetailLevel {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "summary" => Ok(Self::Summary),
            "details" | "detail" => Ok(Self::Details),
            "source" => Ok(Self::Source),
            other => Err(QueryError::UnknownDetail(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryCommand {
    /// Exact name, qualified name or symbol key.
    Lookup(String),
    FuzzySearch { query: String, limit: Option<usize> },
    Subtypes { name: String, transitive: bool },
    Dependents { unit: String, transitive: bool },
    Dependencies { unit: String, transitive: bool },
    /// Declaration to definition.
    Resolve(String),
    /// Reference id of a masked list, or a symbol key.
    Expand(String),
    /// Source id (`src:<key>`) or symbol key.
    Source(String),
    /// Symbols of the same unit whose signatures or properties name a type.
    References(String),
    /// Callables of the same unit whose bodies call a callable.
    Callers(String),
    /// Callables of the same unit a callable's body calls.
    Callees(String),
}

impl QueryCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Lookup(_) => "lookup",
            Self::FuzzySearch { .. } => "fuzzy_search",
            Self::Subtypes { .. } => "subtypes",
            Self::Dependents { .. } => "dependents",
            Self::Dependencies { .. } => "dependencies",
            Self::Resolve(_) => "resolve",
            Self::Expand(_) => "expand",
            Self::Source(_) => "source",
            Self::References(_) => "references",
            Self::Callers(_) => "callers",
            Self::Callees(_) => "callees",
        }
    }

    pub fn argument(&self) -> &str {
        match self {
            Self::Lookup(arg)
            | Self::Resolve(arg)
            | Self::Expand(arg)
            | Self::Source(arg)
            | Self::References(arg)
            | Self::Callers(arg)
            | Self::Callees(arg) => arg,
            Self::FuzzySearch { query, .. } => query,
            Self::Subtypes { name, .. } => name,
            Self::Dependents { unit, .. } | Self::Dependencies { unit, .. } => unit,
        }
    }
}

impl fmt::Display for QueryCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        match self {
            Self::FuzzySearch {
                limit: Some(limit), ..
            } => write!(f, " --limit {limit}")?,
            Self::Subtypes {
                transitive: true, ..
            }
            | Self::Dependents {
                transitive: true, ..
            }
            | Self::Dependencies {
                transitive: true, ..
            } => f.write_str(" --transitive")?,
            _ => {}
        }
        write!(f, " {}", self.argument())
    }
}

impl FromStr for QueryCommand {
    type Err = QueryError;

    fn from_str(line: &str) -> QueryResult<Self> {
        let line = line.trim();
        let (name, mut rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim_start()),
            None => (line, ""),
        };
        if name.is_empty() {
            return Err(QueryError::UnknownCommand(String::new()));
        }

        let mut transitive = false;
        let mut limit = None;
        while let Some(flagged) = rest.strip_prefix("--") {
            let (flag, after) = flagged
                .split_once(char::is_whitespace)
                .unwrap_or((flagged, ""));
            let after = after.trim_start();
            match flag {
                "transitive" => {
                    transitive = true;
                    rest = after;
                }
                "limit" => {
                    let (value, after_value) = after
                        .split_once(char::is_whitespace)
                        .unwrap_or((after, ""));
                    limit = Some(value.parse::<usize>().map_err(|_| QueryError::InvalidOption {
                        command: name.to_string(),
                        option: format!("--limit {value}"),
                    })?);
                    rest = after_value.trim_start();
                }
                other => {
                    return Err(QueryError::InvalidOption {
                        command: name.to_string(),
                        option: format!("--{other}"),
                    });
                }
            }
        }

        let arg = rest.trim();
        if arg.is_empty() {
            return Err(match name {
                "lookup" | "fuzzy_search" | "subtypes" | "dependents" | "dependencies"
                | "resolve" | "expand" | "source" | "references" | "callers" | "callees" => {
                    QueryError::MissingArgument(name.to_string())
                }
                other => QueryError::UnknownCommand(other.to_string()),
            });
        }
        let arg = arg.to_string();

        let reject = |option: &str| QueryError::InvalidOption {
            command: name.to_string(),
            option: option.to_string(),
        };
        let command = match name {
            "lookup" | "resolve" | "expand" | "source" | "fuzzy_search" | "references"
            | "callers" | "callees"
                if transitive =>
            {
                return Err(reject("--transitive"));
            }
            "fuzzy_search" => Self::FuzzySearch { query: arg, limit },
            _ if limit.is_some() => return Err(reject("--limit")),
            "lookup" => Self::Lookup(arg),
            "subtypes" => Self::Subtypes {
                name: arg,
                transitive,
            },
            "dependents" => Self::Dependents {
                unit: arg,
                transitive,
            },
            "dependencies" => Self::Dependencies {
                unit: arg,
                transitive,
            },
            "resolve" => Self::Resolve(arg),
            "expand" => Self::Expand(arg),
            "source" => Self::Source(arg),
            "references" => Self::References(arg),
            "callers" => Self::Callers(arg),
            "callees" => Self::Callees(arg),
            other => return Err(QueryError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_and_arguments() {
        let cmd: QueryCommand = "subtypes --transitive UObject".parse().expect("parse");
        assert_eq!(
            cmd,
            QueryCommand::Subtypes {
                name: "UObject".to_string(),
                transitive: true
            }
        );

        let cmd: QueryCommand = "fuzzy_search --limit 10 AddMov".parse().expect("parse");
        assert_eq!(
            cmd,
            QueryCommand::FuzzySearch {
                query: "AddMov".to_string(),
                limit: Some(10)
            }
        );
    }

    #[test]
    fn argument_keeps_inner_spaces() {
        let cmd: QueryCommand = "source src:fn:Foo(const FString&, int32)".parse().expect("parse");
        assert_eq!(cmd, QueryCommand::Source("src:fn:Foo(const FString&, int32)".to_string()));
    }

    #[test]
    fn display_parses_back() {
        let commands = [
            QueryCommand::Lookup("AActor".to_string()),
            QueryCommand::FuzzySearch {
                query: "Actor".to_string(),
                limit: Some(3),
            },
            QueryCommand::Dependents {
                unit: "Core".to_string(),
                transitive: true,
            },
            QueryCommand::Callers("AActor::Tick".to_string()),
        ];
        for cmd in commands {
            let text = cmd.to_string();
            assert_eq!(text.parse::<QueryCommand>().expect("reparse"), cmd);
        }
        assert_eq!(
            QueryCommand::FuzzySearch {
                query: "Foo".to_string(),
                limit: None
            }
            .to_string(),
            "fuzzy_search Foo"
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            "frobnicate X".parse::<QueryCommand>(),
            Err(QueryError::UnknownCommand("frobnicate".to_string()))
        );
        assert_eq!(
            "lookup".parse::<QueryCommand>(),
            Err(QueryError::MissingArgument("lookup".to_string()))
        );
        assert!(matches!(
            "lookup --transitive AActor".parse::<QueryCommand>(),
            Err(QueryError::InvalidOption { .. })
        ));
        assert_eq!(
            "references".parse::<QueryCommand>(),
            Err(QueryError::MissingArgument("references".to_string()))
        );
        assert!(matches!(
            "callees --transitive Tick".parse::<QueryCommand>(),
            Err(QueryError::InvalidOption { .. })
        ));
        assert!(matches!(
            "fuzzy_search --limit many Actor".parse::<QueryCommand>(),
            Err(QueryError::InvalidOption { .. })
        ));
    }

    #[test]
    fn detail_levels_parse() {
        assert_eq!("details".parse::<DetailLevel>(), Ok(DetailLevel::Details));
        assert_eq!(DetailLevel::default(), DetailLevel::Summary);
        assert!("verbose".parse::<DetailLevel>().is_err());
    }
}
