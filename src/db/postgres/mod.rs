mod catalogue;

pub use catalogue::{PostgresCatalogueRepo, PostgresCatalogueTx};
