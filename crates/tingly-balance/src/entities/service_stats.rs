use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// One row per (rule, provider, model) routing target.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "service_stats")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub rule_uuid: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub provider: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub model: String,
    pub request_count: i64,
    pub last_used: OffsetDateTime,
    pub window_start: OffsetDateTime,
    pub window_request_count: i64,
    pub window_tokens_consumed: i64,
    pub window_input_tokens: i64,
    pub window_output_tokens: i64,
    pub time_window: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
