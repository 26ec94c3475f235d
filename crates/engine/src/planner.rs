//! Planning algorithm (§4.1): turns a `PrepareRequest` into an ordered list
//! of canonicalized steps, validating shape per `prepare_kind`.

use sqlrs_core::model::{ChangesetRef, PrepareKind};
use sqlrs_core::proto::PrepareRequest;

use crate::error::EngineError;

#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub position: u32,
    /// `-f <file>` or `-c <sql>` for psql; the changelog path for
    /// liquibase.
    pub file: Option<String>,
    pub sql: Option<String>,
    pub session_args: Vec<String>,
    pub changeset: ChangesetRef,
    /// Normalized whitespace, absolute paths, sorted environment keys —
    /// this step's contribution to `prepare_args_normalized`.
    pub canonical: String,
}

pub fn validate_request(request: &PrepareRequest) -> Result<(), EngineError> {
    if request.image_id.trim().is_empty() {
        return Err(EngineError::InvalidArgument("image_id must not be empty".into()));
    }
    match request.prepare_kind {
        PrepareKind::Psql => {
            if request.psql_args.is_empty() {
                return Err(EngineError::InvalidArgument(
                    "psql_args must contain at least one -f or -c step".into(),
                ));
            }
        }
        PrepareKind::Liquibase => {
            if request.liquibase_changelog.as_deref().unwrap_or("").trim().is_empty() {
                return Err(EngineError::InvalidArgument(
                    "liquibase_changelog is required for prepare_kind=liquibase".into(),
                ));
            }
            match request.liquibase_exec_mode.as_deref() {
                Some("sequential") | Some("parallel") => {}
                _ => {
                    return Err(EngineError::InvalidArgument(
                        "liquibase_exec_mode must be one of {sequential, parallel}".into(),
                    ))
                }
            }
        }
    }
    Ok(())
}

/// Turns validated request args into steps. Call [`validate_request`]
/// first; this function assumes its invariants hold.
pub fn plan_steps(request: &PrepareRequest) -> Vec<PlannedStep> {
    match request.prepare_kind {
        PrepareKind::Psql => plan_psql_steps(&request.psql_args),
        PrepareKind::Liquibase => plan_liquibase_steps(request.liquibase_changelog.as_deref().unwrap_or("")),
    }
}

/// Each `-f <file>` or `-c <sql>` becomes one step; every other flag is a
/// "session" argument attached to every step (§4.1).
fn plan_psql_steps(args: &[String]) -> Vec<PlannedStep> {
    let mut session_args = Vec::new();
    let mut step_origins: Vec<(Option<String>, Option<String>)> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-f" => {
                if let Some(file) = args.get(i + 1) {
                    step_origins.push((Some(canonicalize_path(file)), None));
                    i += 2;
                    continue;
                }
            }
            "-c" => {
                if let Some(sql) = args.get(i + 1) {
                    step_origins.push((None, Some(normalize_whitespace(sql))));
                    i += 2;
                    continue;
                }
            }
            other => session_args.push(other.to_string()),
        }
        i += 1;
    }
    session_args.sort();

    step_origins
        .into_iter()
        .enumerate()
        .map(|(idx, (file, sql))| {
            let origin = file.clone().unwrap_or_else(|| sql.clone().unwrap_or_default());
            PlannedStep {
                position: idx as u32,
                file,
                sql,
                session_args: session_args.clone(),
                changeset: ChangesetRef::default(),
                canonical: format!("psql:{}:{}", origin, session_args.join(",")),
            }
        })
        .collect()
}

/// The target changelog is parsed into changesets; here each `<changeSet>`
/// tag in the changelog text becomes one step, carrying the id/author/path
/// triple the model's `ChangesetRef` holds.
fn plan_liquibase_steps(changelog: &str) -> Vec<PlannedStep> {
    parse_changesets(changelog)
        .into_iter()
        .enumerate()
        .map(|(idx, (id, author, path))| {
            let canonical = format!("liquibase:{id}:{author}:{path}");
            PlannedStep {
                position: idx as u32,
                file: Some(path.clone()),
                sql: None,
                session_args: Vec::new(),
                changeset: ChangesetRef {
                    changeset_id: Some(id),
                    changeset_author: Some(author),
                    changeset_path: Some(path),
                },
                canonical,
            }
        })
        .collect()
}

/// Minimal `<changeSet id="..." author="...">` scanner over changelog XML
/// text; `path` is the changelog itself, since sqlrs doesn't resolve
/// `<include>` directives.
fn parse_changesets(changelog: &str) -> Vec<(String, String, String)> {
    let mut out = Vec::new();
    for line in changelog.lines() {
        let trimmed = line.trim();
        if !trimmed.starts_with("<changeSet") {
            continue;
        }
        let id = extract_attr(trimmed, "id").unwrap_or_else(|| format!("unnamed-{}", out.len()));
        let author = extract_attr(trimmed, "author").unwrap_or_else(|| "unknown".to_string());
        out.push((id, author, "changelog.xml".to_string()));
    }
    out
}

fn extract_attr(line: &str, attr: &str) -> Option<String> {
    let needle = format!("{attr}=\"");
    let start = line.find(&needle)? + needle.len();
    let end = line[start..].find('"')? + start;
    Some(line[start..end].to_string())
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn canonicalize_path(p: &str) -> String {
    if p.starts_with('/') {
        p.to_string()
    } else {
        format!("/{p}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlrs_core::model::PrepareKind;

    fn psql_request(args: Vec<&str>) -> PrepareRequest {
        PrepareRequest {
            prepare_kind: PrepareKind::Psql,
            image_id: "postgres:15".into(),
            plan_only: false,
            snapshot_mode: "always".into(),
            psql_args: args.into_iter().map(String::from).collect(),
            liquibase_changelog: None,
            liquibase_exec_mode: None,
        }
    }

    #[test]
    fn rejects_empty_image_id() {
        let mut req = psql_request(vec!["-c", "select 1"]);
        req.image_id = "".into();
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn rejects_liquibase_without_changelog() {
        let req = PrepareRequest {
            prepare_kind: PrepareKind::Liquibase,
            image_id: "postgres:15".into(),
            plan_only: false,
            snapshot_mode: "always".into(),
            psql_args: vec![],
            liquibase_changelog: None,
            liquibase_exec_mode: Some("sequential".into()),
        };
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn rejects_bad_liquibase_exec_mode() {
        let req = PrepareRequest {
            prepare_kind: PrepareKind::Liquibase,
            image_id: "postgres:15".into(),
            plan_only: false,
            snapshot_mode: "always".into(),
            psql_args: vec![],
            liquibase_changelog: Some("changelog.xml".into()),
            liquibase_exec_mode: Some("eventually".into()),
        };
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn psql_args_split_into_steps_with_shared_session_args() {
        let req = psql_request(vec!["-f", "a.sql", "-q", "-c", "select 1"]);
        let steps = plan_steps(&req);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].file.as_deref(), Some("/a.sql"));
        assert_eq!(steps[1].sql.as_deref(), Some("select 1"));
        assert_eq!(steps[0].session_args, vec!["-q".to_string()]);
    }

    #[test]
    fn liquibase_changelog_parses_one_step_per_changeset() {
        let changelog = r#"
            <changeSet id="1" author="alice">
            <changeSet id="2" author="bob">
        "#;
        let steps = plan_liquibase_steps(changelog);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].changeset.changeset_id.as_deref(), Some("1"));
        assert_eq!(steps[1].changeset.changeset_author.as_deref(), Some("bob"));
    }
}
