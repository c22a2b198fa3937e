use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::{
    error::{Error, Result},
    query::{Occurrence, QueryRequest},
};

#[derive(Debug, Parser)]
#[command(
    name = "docnrt",
    about = "Near-real-time document search over a local index"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Index every matching file under a directory
    Ingest(IngestArgs),
    /// Structured multi-field search
    Search(SearchArgs),
    /// Free-text search over document content
    Query(QueryArgs),
    /// Exact-term lookup; suffix terms are required
    Term(TermArgs),
    /// Documents whose field lies in an inclusive range
    Range(RangeArgs),
    /// Delete a document by id
    Delete {
        /// Identity value of the document
        id: String,
    },
    /// Delete every document
    DeleteAll,
    /// Show index statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Read or change persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print one setting, or all of them
    Get {
        key: Option<String>,
    },
    /// Persist a setting
    Set {
        key: String,
        value: String,
    },
    /// Remove a setting (revert to default)
    Unset {
        key: String,
    },
}

// -- Ingest --

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// Directory to index (default: the configured document directory)
    pub path: Option<PathBuf>,

    /// Comma-separated extensions, overriding the stored setting
    #[arg(short, long)]
    pub extensions: Option<String>,

    /// Output the report as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// Field that must match, as field=value (repeatable)
    #[arg(long = "must", value_name = "FIELD=VALUE")]
    pub must: Vec<String>,

    /// Field with alternative keywords, as field=words (repeatable)
    #[arg(long = "should", value_name = "FIELD=WORDS")]
    pub should: Vec<String>,

    /// Field keywords to exclude, as field=words (repeatable)
    #[arg(long = "must-not", value_name = "FIELD=WORDS")]
    pub must_not: Vec<String>,

    #[command(flatten)]
    pub page: PageArgs,
}

impl SearchArgs {
    pub fn to_request(&self) -> Result<QueryRequest> {
        let mut request = QueryRequest::new();
        let groups = [
            (Occurrence::Must, &self.must),
            (Occurrence::Should, &self.should),
            (Occurrence::MustNot, &self.must_not),
        ];
        for (occurrence, clauses) in groups {
            for clause in clauses {
                let (field, keywords) = parse_clause(clause)?;
                request.insert(occurrence, field, keywords);
            }
        }
        Ok(request)
    }
}

// -- Term and range --

#[derive(Debug, Parser)]
pub struct TermArgs {
    /// Exact values, as field=value
    #[arg(required = true, value_name = "FIELD=VALUE")]
    pub terms: Vec<String>,

    #[command(flatten)]
    pub page: PageArgs,
}

impl TermArgs {
    pub fn to_terms(&self) -> Result<Vec<(String, String)>> {
        self.terms
            .iter()
            .map(|clause| {
                let (field, value) = parse_clause(clause)?;
                Ok((field.to_string(), value.to_string()))
            })
            .collect()
    }
}

#[derive(Debug, Parser)]
pub struct RangeArgs {
    /// Field to compare
    pub field: String,
    /// Smallest accepted value
    pub lower: String,
    /// Largest accepted value
    pub upper: String,

    #[command(flatten)]
    pub page: PageArgs,
}

fn parse_clause(clause: &str) -> Result<(&str, &str)> {
    match clause.split_once('=') {
        Some((field, keywords)) if !field.trim().is_empty() => {
            Ok((field.trim(), keywords))
        }
        _ => Err(Error::Validation(format!(
            "expected FIELD=VALUE, got '{clause}'"
        ))),
    }
}

// -- Query --

#[derive(Debug, Parser)]
pub struct QueryArgs {
    /// Query string, in the engine's query syntax
    pub query: String,

    #[command(flatten)]
    pub page: PageArgs,
}

#[derive(Debug, Clone, Args)]
pub struct PageArgs {
    /// Page to return, starting at 1 (all hits up to the default limit
    /// when omitted)
    #[arg(short, long)]
    pub page: Option<usize>,

    /// Hits per page
    #[arg(short = 'n', long, default_value = "10")]
    pub size: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Output only file paths (one per line)
    #[arg(long)]
    pub files: bool,
}

impl PageArgs {
    /// `(page_index, page_size)` when a page was asked for.
    pub fn page(&self) -> Option<(usize, usize)> {
        self.page.map(|index| (index, self.size))
    }
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docnrt",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_search_clauses() {
        let cli = Cli::parse_from([
            "docnrt",
            "search",
            "--should",
            "name=index main",
            "--must",
            "suffix=html",
            "--must-not",
            "name=draft",
            "--page",
            "2",
        ]);
        let Command::Search(args) = cli.command else {
            panic!("expected search command");
        };
        assert_eq!(args.page.page, Some(2));
        assert_eq!(args.page.size, 10);

        let expected = QueryRequest::new()
            .should("name", "index main")
            .must("suffix", "html")
            .must_not("name", "draft");
        assert_eq!(args.to_request().unwrap(), expected);
    }

    #[test]
    fn malformed_clause_is_rejected() {
        let cli = Cli::parse_from(["docnrt", "search", "--must", "html"]);
        let Command::Search(args) = cli.command else {
            panic!("expected search command");
        };
        assert!(matches!(args.to_request(), Err(Error::Validation(_))));
    }

    #[test]
    fn parse_query_defaults() {
        let cli = Cli::parse_from(["docnrt", "query", "hello"]);
        match cli.command {
            Command::Query(args) => {
                assert_eq!(args.query, "hello");
                assert_eq!(args.page.page, None);
                assert!(!args.page.json);
                assert!(!args.page.files);
            }
            _ => panic!("expected query command"),
        }
    }

    #[test]
    fn parse_term_and_range() {
        let cli = Cli::parse_from([
            "docnrt",
            "term",
            "suffix=html",
            "name=index",
            "-n",
            "5",
        ]);
        let Command::Term(args) = cli.command else {
            panic!("expected term command");
        };
        assert_eq!(
            args.to_terms().unwrap(),
            vec![
                ("suffix".to_string(), "html".to_string()),
                ("name".to_string(), "index".to_string()),
            ]
        );
        assert_eq!(args.page.size, 5);

        let cli = Cli::parse_from(["docnrt", "range", "name", "a", "m"]);
        let Command::Range(args) = cli.command else {
            panic!("expected range command");
        };
        assert_eq!((args.lower.as_str(), args.upper.as_str()), ("a", "m"));
    }

    #[test]
    fn ingest_path_is_optional() {
        let cli = Cli::parse_from(["docnrt", "ingest"]);
        let Command::Ingest(args) = cli.command else {
            panic!("expected ingest command");
        };
        assert!(args.path.is_none());
    }
}
