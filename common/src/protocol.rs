//! Wire vocabulary shared by the server and the client.
//!
//! Every message on the wire is one line of ASCII text. The exact strings
//! below are the protocol; the enums exist so both ends match on them
//! exhaustively instead of comparing strings.

use thiserror::Error;

/// Prefix of every failure reply sent by the server.
pub const ERROR_PREFIX: &str = "error_";

pub const SEARCH_HEADLINES: &str = "Search Headlines";
pub const LIST_SOURCES: &str = "List of Sources";
pub const QUIT: &str = "Quit";

pub const CATEGORIES: &[&str] = &["business", "general", "health", "science", "sports", "technology"];

/// (code, display name)
pub const COUNTRIES: &[(&str, &str)] = &[
    ("au", "Australia"),
    ("ca", "Canada"),
    ("jp", "Japan"),
    ("ae", "UAE"),
    ("sa", "Saudi Arabia"),
    ("kr", "Korea"),
    ("us", "USA"),
    ("ma", "Morocco"),
];

/// (code, display name)
pub const LANGUAGES: &[(&str, &str)] = &[("ar", "Arabic"), ("en", "English")];

/// Country used when headlines are requested without a filter.
pub const DEFAULT_COUNTRY: &str = "us";

pub fn is_supported_category(value: &str) -> bool {
    CATEGORIES.contains(&value)
}

pub fn is_supported_country(value: &str) -> bool {
    COUNTRIES.iter().any(|(code, _)| *code == value)
}

pub fn is_supported_language(value: &str) -> bool {
    LANGUAGES.iter().any(|(code, _)| *code == value)
}

/// Resolve user input (code or display name, any case) to a catalog code.
pub fn resolve_code(table: &'static [(&'static str, &'static str)], input: &str) -> Option<&'static str> {
    let input = input.trim();
    table
        .iter()
        .find(|(code, name)| code.eq_ignore_ascii_case(input) || name.eq_ignore_ascii_case(input))
        .map(|(code, _)| *code)
}

/// Which upstream catalog a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Headlines,
    Sources,
}

impl Domain {
    /// Stable name used in cache keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Headlines => "headlines",
            Domain::Sources => "sources",
        }
    }

    /// Mandatory top-level key of a result document.
    pub fn payload_key(&self) -> &'static str {
        match self {
            Domain::Headlines => "articles",
            Domain::Sources => "sources",
        }
    }

    pub fn command(&self) -> &'static str {
        match self {
            Domain::Headlines => SEARCH_HEADLINES,
            Domain::Sources => LIST_SOURCES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopCommand {
    Search(Domain),
    Quit,
}

impl TopCommand {
    /// Returns `None` for anything outside the vocabulary; the server ignores those.
    pub fn parse(message: &str) -> Option<Self> {
        match message {
            SEARCH_HEADLINES => Some(TopCommand::Search(Domain::Headlines)),
            LIST_SOURCES => Some(TopCommand::Search(Domain::Sources)),
            QUIT => Some(TopCommand::Quit),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            TopCommand::Search(domain) => domain.command(),
            TopCommand::Quit => QUIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadlinesQuery {
    Keywords,
    Category,
    Country,
    Latest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcesQuery {
    Category,
    Country,
    Language,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown search type: {0}")]
pub struct UnknownSearchType(pub String);

/// Filter mode selected after a top-level command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubCommand {
    Headlines(HeadlinesQuery),
    Sources(SourcesQuery),
}

impl SubCommand {
    pub fn parse(domain: Domain, message: &str) -> Result<Self, UnknownSearchType> {
        let sub = match (domain, message) {
            (Domain::Headlines, "Search by keywords") => SubCommand::Headlines(HeadlinesQuery::Keywords),
            (Domain::Headlines, "Search by category") => SubCommand::Headlines(HeadlinesQuery::Category),
            (Domain::Headlines, "Search by country") => SubCommand::Headlines(HeadlinesQuery::Country),
            (Domain::Headlines, "List all new headlines") => SubCommand::Headlines(HeadlinesQuery::Latest),
            (Domain::Sources, "Search by category") => SubCommand::Sources(SourcesQuery::Category),
            (Domain::Sources, "Search by country") => SubCommand::Sources(SourcesQuery::Country),
            (Domain::Sources, "Search by language") => SubCommand::Sources(SourcesQuery::Language),
            (Domain::Sources, "List all sources") => SubCommand::Sources(SourcesQuery::All),
            _ => return Err(UnknownSearchType(message.to_string())),
        };
        Ok(sub)
    }

    pub fn domain(&self) -> Domain {
        match self {
            SubCommand::Headlines(_) => Domain::Headlines,
            SubCommand::Sources(_) => Domain::Sources,
        }
    }

    /// Whether one more message carrying the filter value follows.
    pub fn requires_param(&self) -> bool {
        !matches!(
            self,
            SubCommand::Headlines(HeadlinesQuery::Latest) | SubCommand::Sources(SourcesQuery::All)
        )
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            SubCommand::Headlines(HeadlinesQuery::Keywords) => "Search by keywords",
            SubCommand::Headlines(HeadlinesQuery::Category) | SubCommand::Sources(SourcesQuery::Category) => {
                "Search by category"
            }
            SubCommand::Headlines(HeadlinesQuery::Country) | SubCommand::Sources(SourcesQuery::Country) => {
                "Search by country"
            }
            SubCommand::Headlines(HeadlinesQuery::Latest) => "List all new headlines",
            SubCommand::Sources(SourcesQuery::Language) => "Search by language",
            SubCommand::Sources(SourcesQuery::All) => "List all sources",
        }
    }

    /// Tag embedded in the response file name.
    pub fn request_kind(&self) -> &'static str {
        match self {
            SubCommand::Headlines(HeadlinesQuery::Keywords) => "keyword_search",
            SubCommand::Headlines(HeadlinesQuery::Category) => "category_search",
            SubCommand::Headlines(HeadlinesQuery::Country) => "country_search",
            SubCommand::Headlines(HeadlinesQuery::Latest) => "all_headlines",
            SubCommand::Sources(SourcesQuery::Category) => "sources_category",
            SubCommand::Sources(SourcesQuery::Country) => "sources_country",
            SubCommand::Sources(SourcesQuery::Language) => "sources_language",
            SubCommand::Sources(SourcesQuery::All) => "all_sources",
        }
    }
}
