use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::{
    indexing::{DEFAULT_BATCH_SIZE, IndexOptions},
    vector_store::{DEFAULT_LIMIT, DEFAULT_THRESHOLD, SearchOptions},
};

#[derive(Debug, Parser)]
#[command(
    name = "notevec",
    about = "Local semantic search over a folder of notes"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Embedding model name (e.g. all-MiniLM-L6-v2, bge-small-en-v1.5)
    #[arg(long, global = true)]
    pub model: Option<String>,

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
    /// Sync the index with a directory of notes
    Index(IndexArgs),
    /// Find notes similar to a query
    Search(SearchArgs),
    /// Find notes similar to an indexed note
    Related(RelatedArgs),
    /// Remove a note from the index
    Remove {
        /// Note id (path relative to the indexed directory)
        id: String,
    },
    /// Show index statistics
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete every stored embedding
    Clear,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// Directory containing .md and .txt notes
    pub path: PathBuf,

    /// Re-embed every note, not just new and changed ones
    #[arg(long)]
    pub force: bool,

    /// Notes embedded per batch
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
}

impl IndexArgs {
    pub fn options(&self) -> IndexOptions {
        IndexOptions {
            batch_size: self.batch_size,
            force_reindex: self.force,
        }
    }
}

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
    pub count: usize,

    /// Minimum cosine similarity
    #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
    pub threshold: f32,

    /// Note ids to leave out (repeatable)
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

impl SearchArgs {
    pub fn options(&self) -> SearchOptions {
        SearchOptions {
            limit: self.count,
            threshold: self.threshold,
            exclude_ids: self.exclude.clone(),
        }
    }
}

#[derive(Debug, Parser)]
pub struct RelatedArgs {
    /// Id of an indexed note
    pub id: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
    pub count: usize,

    /// Minimum cosine similarity
    #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
    pub threshold: f32,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

impl RelatedArgs {
    pub fn options(&self) -> SearchOptions {
        SearchOptions {
            limit: self.count,
            threshold: self.threshold,
            exclude_ids: Vec::new(),
        }
    }
}

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
            "notevec",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_search_defaults() {
        let cli = Cli::parse_from(["notevec", "search", "hello"]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.query, "hello");
                assert_eq!(args.options(), SearchOptions::default());
                assert!(!args.json);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_search_with_options() {
        let cli = Cli::parse_from([
            "notevec",
            "search",
            "rust",
            "-n",
            "3",
            "--threshold",
            "0.2",
            "--exclude",
            "a.md",
            "--exclude",
            "b.md",
            "--json",
        ]);
        let Command::Search(args) = cli.command else {
            panic!("expected search command");
        };
        let options = args.options();
        assert_eq!(options.limit, 3);
        assert!((options.threshold - 0.2).abs() < f32::EPSILON);
        assert_eq!(options.exclude_ids, vec!["a.md", "b.md"]);
        assert!(args.json);
    }

    #[test]
    fn parse_index_defaults() {
        let cli = Cli::parse_from(["notevec", "index", "notes"]);
        let Command::Index(args) = cli.command else {
            panic!("expected index command");
        };
        assert_eq!(args.path, PathBuf::from("notes"));
        assert_eq!(args.options(), IndexOptions::default());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "notevec",
            "status",
            "--data-dir",
            "/tmp/nv",
            "-vv",
        ]);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/nv")));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["notevec", "-q", "-v", "status"]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
