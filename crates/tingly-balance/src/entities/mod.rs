pub mod service_stats;

pub use service_stats::Entity as ServiceStatsEntity;
