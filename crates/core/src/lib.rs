pub mod amount;
pub mod fragment;
pub mod record;
pub mod text;

pub use amount::{format_amount, parse_amount, AmountError};
pub use fragment::{RecognizedFragment, Region, TextLine};
pub use record::{Field, TransactionRecord, UNCATEGORIZED};
