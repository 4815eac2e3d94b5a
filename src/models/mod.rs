pub mod profile;
pub mod usage_record;

pub use profile::{CreateProfileOptions, Profile, ProfileConfig, UpdateProfileOptions};
pub use usage_record::UsageRecord;
