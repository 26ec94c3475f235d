//! Query filter structs for the Registry's `List*` operations (§4.2). All
//! fields AND-combine; `None` means "don't filter on this".

use sqlrs_core::model::{JobStatus, PrepareKind};

#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    pub image_id: Option<String>,
    pub id_prefix: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    pub image_id: Option<String>,
    pub state_id: Option<String>,
    pub id_prefix: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StateFilter {
    pub image_id: Option<String>,
    pub id_prefix: Option<String>,
    pub prepare_kind: Option<PrepareKind>,
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub image_id: Option<String>,
    pub status: Option<JobStatus>,
}
