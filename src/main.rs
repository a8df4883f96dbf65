use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use revtree::{Body, Database, Options, PURGE_ALL, RevisionId, Sequence};
use serde_json::json;
use tracing::debug;
use tracing_subscriber::{EnvFilter, prelude::*};

#[derive(Parser, Debug)]
#[clap(version, about)]
struct Cli {
    /// Database directory. Defaults to the platform data directory.
    #[clap(long)]
    db: Option<PathBuf>,
    /// Path to an options file
    #[clap(short, long)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or update a document.
    Put {
        doc_id: String,
        /// JSON body of the new revision.
        json: String,
        /// Revision to replace.
        #[clap(long)]
        rev: Option<RevisionId>,
        /// Write a deletion.
        #[clap(long)]
        deleted: bool,
        /// Allow branching off a revision that is not the winner.
        #[clap(long)]
        allow_conflict: bool,
    },
    /// Print a document, or one of its revisions.
    Get {
        doc_id: String,
        #[clap(long)]
        rev: Option<RevisionId>,
    },
    /// List the revisions of a document.
    Revs {
        doc_id: String,
        /// Only list leaves.
        #[clap(long)]
        current: bool,
    },
    /// Print the `_revisions` history of a revision.
    History { doc_id: String, rev: RevisionId },
    /// Prune old history from all documents.
    Prune {
        #[clap(long)]
        max_depth: Option<u32>,
    },
    /// Purge revisions of a document, or the whole document if none are given.
    Purge { doc_id: String, revs: Vec<String> },
    /// List current revisions changed after a sequence.
    Changes {
        #[clap(long, default_value_t = 0)]
        since: Sequence,
        #[clap(long)]
        limit: Option<usize>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();
    let args = Cli::parse();

    let options = if let Some(path) = &args.config {
        debug!("loading options from {:?}", path);
        Options::load(path)?
    } else {
        debug!("using default options");
        Options::default()
    };
    let dir = match args.db {
        Some(dir) => dir,
        None => Options::data_dir()?,
    };
    let mut db = Database::persistent(&dir, options)?;

    match args.command {
        Command::Put {
            doc_id,
            json,
            rev,
            deleted,
            allow_conflict,
        } => {
            let body = Body::from_slice(json.as_bytes())?;
            let rev = db.put_revision(Some(&doc_id), body, rev.as_ref(), deleted, allow_conflict)?;
            print_json(&json!({"id": rev.doc_id, "rev": rev.rev_id, "seq": rev.sequence}))?;
        }
        Command::Get { doc_id, rev } => {
            let rev = match rev {
                Some(rev_id) => db.get_revision(&doc_id, &rev_id)?,
                None => db.get_document(&doc_id)?,
            };
            let mut props = db
                .get_properties(&rev)?
                .with_context(|| format!("{} of {doc_id} has no stored body", rev.rev_id))?;
            let conflicts: Vec<_> = db
                .get_conflicting_revisions(&doc_id)?
                .into_iter()
                .filter(|leaf| leaf.rev_id != rev.rev_id)
                .map(|leaf| leaf.rev_id.to_string())
                .collect();
            if !conflicts.is_empty() {
                props.insert("_conflicts", conflicts);
            }
            print_json(&props.into_value())?;
        }
        Command::Revs { doc_id, current } => {
            for rev in db.get_all_revisions(&doc_id, current)? {
                let mut flags = Vec::new();
                if rev.current {
                    flags.push("current");
                }
                if rev.deleted {
                    flags.push("deleted");
                }
                if rev.is_stub() {
                    flags.push("stub");
                }
                println!("{}\t{}\t{}", rev.sequence, rev.rev_id, flags.join(","));
            }
        }
        Command::History { doc_id, rev } => {
            let rev = db.get_revision(&doc_id, &rev)?;
            print_json(&db.get_revision_history_dict(&rev, &[])?.to_value())?;
        }
        Command::Prune { max_depth } => {
            let max_depth = max_depth.unwrap_or(db.options().max_rev_tree_depth);
            let pruned = db.prune(max_depth)?;
            println!("pruned {pruned} revisions");
        }
        Command::Purge { doc_id, revs } => {
            let revs = if revs.is_empty() {
                vec![PURGE_ALL.to_string()]
            } else {
                revs
            };
            let purged = db.purge(BTreeMap::from([(doc_id, revs)]))?;
            print_json(&serde_json::to_value(purged)?)?;
        }
        Command::Changes { since, limit } => {
            for rev in db.changes_since(since, limit)? {
                let deleted = if rev.deleted { "\tdeleted" } else { "" };
                println!("{}\t{}\t{}{deleted}", rev.sequence, rev.doc_id, rev.rev_id);
            }
        }
    }
    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
