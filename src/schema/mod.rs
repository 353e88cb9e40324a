pub mod alias;
pub mod layout;

pub use alias::AliasTable;
pub use layout::{ColumnKind, RecordLayout};
