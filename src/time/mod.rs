//! Time handling
//!
//! Everything the compiler knows about time lives here:
//!
//! - **Units**: time units, the period sub-parser, bucket-size inference
//! - **Period**: exact calendar arithmetic for month/quarter/year buckets
//! - **Resolver**: turning time-point expressions into absolute instants

pub mod period;
pub mod resolver;
pub mod units;

pub use period::CalendarPeriod;
pub use resolver::{resolve_range, resolve_time, TimeExpr};
pub use units::{infer_bucket_millis, DefaultPeriodParser, PeriodParser, TimeUnit};
