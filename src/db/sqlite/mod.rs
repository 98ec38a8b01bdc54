mod catalogue;
mod common;

pub use catalogue::{SqliteCatalogueRepo, SqliteCatalogueTx};
