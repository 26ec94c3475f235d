//! Registry operations (§4.2): queries and mutations over `states`,
//! `instances`, and `names`.

use chrono::Utc;
use sqlrs_core::id::{InstanceId, StateId};
use sqlrs_core::model::{Instance, InstanceStatus, Name, PrepareKind, State};

use crate::catalog::{normalize_id_prefix, Catalog};
use crate::error::CatalogError;
use crate::event::CatalogEvent;
use crate::filters::{InstanceFilter, NameFilter, StateFilter};

impl Catalog {
    pub fn list_names(&self, filter: &NameFilter) -> Result<Vec<Name>, CatalogError> {
        let prefix = filter.id_prefix.as_deref().map(normalize_id_prefix).transpose()?;
        let inner = self.inner.lock();
        let mut rows: Vec<Name> = inner
            .state
            .names
            .values()
            .filter(|n| filter.image_id.as_deref().map_or(true, |img| n.image_id == img))
            .filter(|n| {
                prefix
                    .as_deref()
                    .map_or(true, |p| n.state_id.as_str().to_ascii_lowercase().starts_with(p))
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    pub fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>, CatalogError> {
        let prefix = filter.id_prefix.as_deref().map(normalize_id_prefix).transpose()?;
        let inner = self.inner.lock();
        let mut rows: Vec<Instance> = inner
            .state
            .instances
            .values()
            .filter(|i| filter.image_id.as_deref().map_or(true, |img| i.image_id == img))
            .filter(|i| {
                filter
                    .state_id
                    .as_deref()
                    .map_or(true, |sid| i.state_id.as_str() == sid)
            })
            .filter(|i| {
                prefix
                    .as_deref()
                    .map_or(true, |p| i.instance_id.as_str().to_ascii_lowercase().starts_with(p))
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    pub fn list_states(&self, filter: &StateFilter) -> Result<Vec<State>, CatalogError> {
        let prefix = filter.id_prefix.as_deref().map(normalize_id_prefix).transpose()?;
        let inner = self.inner.lock();
        let mut rows: Vec<State> = inner
            .state
            .states
            .values()
            .filter(|s| filter.image_id.as_deref().map_or(true, |img| s.image_id == img))
            .filter(|s| filter.prepare_kind.map_or(true, |kind| s.prepare_kind == kind))
            .filter(|s| {
                prefix
                    .as_deref()
                    .map_or(true, |p| s.state_id.as_str().to_ascii_lowercase().starts_with(p))
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    pub fn get_name(&self, name: &str) -> (Option<Name>, bool) {
        let inner = self.inner.lock();
        match inner.state.names.get(name) {
            Some(entry) => (Some(entry.clone()), true),
            None => (None, false),
        }
    }

    /// Resolves `id_or_name` first as a literal `instance_id`, then falls
    /// back to looking it up as a name (§4.2 `GetInstance`). The third
    /// element reports which path resolved the lookup.
    pub fn get_instance(&self, id_or_name: &str) -> (Option<Instance>, bool, bool) {
        let inner = self.inner.lock();
        if let Some(instance) = inner.state.instances.get(id_or_name) {
            return (Some(instance.clone()), true, false);
        }
        if let Some(name_entry) = inner.state.names.get(id_or_name) {
            if let Some(instance_id) = &name_entry.instance_id {
                if let Some(instance) = inner.state.instances.get(instance_id.as_str()) {
                    return (Some(instance.clone()), true, true);
                }
            }
        }
        (None, false, false)
    }

    pub fn get_state(&self, state_id: &StateId) -> (Option<State>, bool) {
        let inner = self.inner.lock();
        match inner.state.get_state(state_id) {
            Some(s) => (Some(s.clone()), true),
            None => (None, false),
        }
    }

    /// Cache lookup for the planner's per-step `(image_id,
    /// state_fingerprint)` check (§4.1).
    pub fn find_state_by_fingerprint(&self, image_id: &str, fingerprint: &str) -> Option<State> {
        self.inner.lock().state.find_state_by_fingerprint(image_id, fingerprint).cloned()
    }

    pub fn update_instance_runtime(
        &self,
        instance_id: &InstanceId,
        runtime_id: String,
    ) -> Result<(), CatalogError> {
        self.commit(CatalogEvent::InstanceRuntimeUpdated {
            instance_id: instance_id.clone(),
            runtime_id,
        })
    }

    pub fn set_instance_runtime_dir(
        &self,
        instance_id: &InstanceId,
        runtime_dir: String,
    ) -> Result<(), CatalogError> {
        self.commit(CatalogEvent::InstanceRuntimeDirSet {
            instance_id: instance_id.clone(),
            runtime_dir,
        })
    }

    pub fn create_state(
        &self,
        state_id: StateId,
        state_fingerprint: String,
        parent_state_id: Option<StateId>,
        image_id: String,
        prepare_kind: PrepareKind,
        prepare_args_normalized: String,
        size_bytes: Option<u64>,
    ) -> Result<State, CatalogError> {
        let state = State {
            state_id,
            state_fingerprint,
            parent_state_id,
            image_id,
            prepare_kind,
            prepare_args_normalized,
            created_at: Utc::now(),
            size_bytes,
        };
        self.commit(CatalogEvent::StateCreated(state.clone()))?;
        Ok(state)
    }

    pub fn delete_state(&self, state_id: &StateId) -> Result<(), CatalogError> {
        self.commit(CatalogEvent::StateDeleted {
            state_id: state_id.clone(),
        })
    }

    /// Atomic create-or-adopt for the `ON CONFLICT(image_id,
    /// state_fingerprint)` semantics in the Prepare Coordinator's execution
    /// algorithm: if a state already carries this `(image_id,
    /// state_fingerprint)` pair — another concurrent job raced us — returns
    /// it unmodified with `created=false` so the caller can drop its
    /// now-redundant snapshot directory and adopt the existing `state_id`.
    /// Otherwise commits a new row and returns `created=true`. Holds the
    /// catalog lock across the lookup and the commit so two concurrent
    /// callers racing on the same fingerprint can never both observe
    /// `created=true`.
    #[allow(clippy::too_many_arguments)]
    pub fn create_state_or_adopt(
        &self,
        state_id: StateId,
        state_fingerprint: String,
        parent_state_id: Option<StateId>,
        image_id: String,
        prepare_kind: PrepareKind,
        prepare_args_normalized: String,
        size_bytes: Option<u64>,
    ) -> Result<(State, bool), CatalogError> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.state.find_state_by_fingerprint(&image_id, &state_fingerprint) {
            return Ok((existing.clone(), false));
        }
        let state = State {
            state_id,
            state_fingerprint,
            parent_state_id,
            image_id,
            prepare_kind,
            prepare_args_normalized,
            created_at: Utc::now(),
            size_bytes,
        };
        let event = CatalogEvent::StateCreated(state.clone());
        inner.wal.append(&event)?;
        inner.wal.flush()?;
        inner.state.apply(event);
        Ok((state, true))
    }

    pub fn create_instance(
        &self,
        instance_id: InstanceId,
        state_id: StateId,
        image_id: String,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<Instance, CatalogError> {
        let instance = Instance {
            instance_id,
            state_id,
            image_id,
            created_at: Utc::now(),
            expires_at,
            status: InstanceStatus::Active,
            runtime_id: None,
            runtime_dir: None,
        };
        self.commit(CatalogEvent::InstanceCreated(instance.clone()))?;
        Ok(instance)
    }

    pub fn delete_instance(&self, instance_id: &InstanceId) -> Result<(), CatalogError> {
        self.commit(CatalogEvent::InstanceDeleted {
            instance_id: instance_id.clone(),
        })
    }

    pub fn set_name(
        &self,
        name: String,
        instance_id: Option<InstanceId>,
        image_id: String,
        state_id: StateId,
        state_fingerprint: String,
        is_primary: bool,
    ) -> Result<Name, CatalogError> {
        let entry = Name {
            name,
            instance_id,
            image_id,
            state_id,
            state_fingerprint,
            last_used_at: Utc::now(),
            is_primary,
        };
        self.commit(CatalogEvent::NameSet(entry.clone()))?;
        Ok(entry)
    }

    pub fn remove_name(&self, name: &str) -> Result<(), CatalogError> {
        self.commit(CatalogEvent::NameRemoved { name: name.to_string() })
    }

    pub fn descendant_state_ids(&self, parent: &StateId) -> Vec<StateId> {
        self.inner.lock().state.descendant_state_ids(parent)
    }

    pub fn instances_of_state(&self, state_id: &StateId) -> Vec<InstanceId> {
        self.inner.lock().state.instances_of_state(state_id)
    }

    pub fn jobs_producing_state(&self, state_id: &StateId) -> Vec<sqlrs_core::id::JobId> {
        self.inner.lock().state.jobs_producing_state(state_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlrs_core::id::IdGen;
    use tempfile::tempdir;

    fn open_catalog() -> (tempfile::TempDir, Catalog) {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        (dir, catalog)
    }

    #[test]
    fn get_instance_resolves_by_name() {
        let (_dir, catalog) = open_catalog();
        let gen = sqlrs_core::id::UuidIdGen;
        let state_id = StateId::new(gen.next_id());
        catalog
            .create_state(
                state_id.clone(),
                "fp".into(),
                None,
                "postgres:15".into(),
                PrepareKind::Psql,
                "".into(),
                None,
            )
            .unwrap();
        let instance_id = InstanceId::new(gen.next_id());
        catalog
            .create_instance(instance_id.clone(), state_id.clone(), "postgres:15".into(), None)
            .unwrap();
        catalog
            .set_name(
                "dev".into(),
                Some(instance_id.clone()),
                "postgres:15".into(),
                state_id.clone(),
                "fp".into(),
                true,
            )
            .unwrap();

        let (found, ok, by_name) = catalog.get_instance("dev");
        assert!(ok);
        assert!(by_name);
        assert_eq!(found.unwrap().instance_id, instance_id);
    }

    #[test]
    fn instance_deletion_clears_dangling_name_reference() {
        let (_dir, catalog) = open_catalog();
        let gen = sqlrs_core::id::UuidIdGen;
        let state_id = StateId::new(gen.next_id());
        catalog
            .create_state(state_id.clone(), "fp".into(), None, "postgres:15".into(), PrepareKind::Psql, "".into(), None)
            .unwrap();
        let instance_id = InstanceId::new(gen.next_id());
        catalog
            .create_instance(instance_id.clone(), state_id.clone(), "postgres:15".into(), None)
            .unwrap();
        catalog
            .set_name("dev".into(), Some(instance_id.clone()), "postgres:15".into(), state_id, "fp".into(), true)
            .unwrap();

        catalog.delete_instance(&instance_id).unwrap();
        let (entry, found) = catalog.get_name("dev");
        assert!(found);
        assert!(entry.unwrap().instance_id.is_none());
    }

    #[test]
    fn list_states_filters_by_prepare_kind() {
        let (_dir, catalog) = open_catalog();
        let gen = sqlrs_core::id::UuidIdGen;
        let psql_id = StateId::new(gen.next_id());
        catalog
            .create_state(psql_id.clone(), "fp-psql".into(), None, "postgres:15".into(), PrepareKind::Psql, "".into(), None)
            .unwrap();
        let liquibase_id = StateId::new(gen.next_id());
        catalog
            .create_state(
                liquibase_id.clone(),
                "fp-liquibase".into(),
                None,
                "postgres:15".into(),
                PrepareKind::Liquibase,
                "".into(),
                None,
            )
            .unwrap();

        let psql_only = catalog
            .list_states(&StateFilter {
                prepare_kind: Some(PrepareKind::Psql),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(psql_only.len(), 1);
        assert_eq!(psql_only[0].state_id, psql_id);

        let all = catalog.list_states(&StateFilter::default()).unwrap();
        assert_eq!(all.iter().map(|s| s.state_id.clone()).collect::<Vec<_>>().len(), 2);
        assert!(all.iter().any(|s| s.state_id == liquibase_id));
    }
}
