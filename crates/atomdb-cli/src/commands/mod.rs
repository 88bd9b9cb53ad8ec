pub mod query;
pub mod show;
pub mod update;

use crate::cli::DatabaseArgs;
use crate::config::FileConfig;
use crate::error::Result;
use atomdb::db::{Database, Query, Selection, connect};
use tracing::debug;

/// Opens the database named on the command line with the merged connection settings.
fn open(args: &DatabaseArgs, config: &FileConfig) -> Result<Database> {
    let options = config.connect_options(args)?;
    debug!(?options, "Connecting.");
    Ok(connect(Some(&args.name), options)?)
}

/// The query for a selection typed on the command line; a bare number is a record id.
fn query_for(selection: Option<&str>) -> Query {
    match selection.map(str::trim) {
        None | Some("") => Query::all(),
        Some(text) => match text.parse::<u64>() {
            Ok(id) => Query::new(Selection::Id(id)),
            Err(_) => Query::new(text),
        },
    }
}
