pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod extractor;
pub mod fisher;
pub mod gmm;
mod metrics;
pub mod scan;
mod server;
pub mod similarity;
pub mod utils;

pub use config::Opts;
pub use dispatch::{Dispatcher, DispatcherConfig, EncodeInput};
pub use error::{ErrorKind, FvError};
pub use fisher::{Descriptor, FisherEncoder};
pub use gmm::{GmmModel, GmmStore};
pub use scan::{MatchRecord, ScanInput, Scanner};
pub use similarity::{Score, Scorer};
