pub mod short_channel_id;
pub mod units;

pub use short_channel_id::ShortChannelId;
pub use units::{SatPerKw, SatPerVbyte};
