//! On-disk path layout (§4.3, §6.4):
//! `<root>/engines/<engine>/<tag>/{base,states/<id>}` and
//! `<root>/jobs/<id>/runtime`.

use std::path::{Path, PathBuf};

use sqlrs_core::id::{JobId, StateId};
use sqlrs_core::image::CanonicalImage;

pub fn engine_tag_dir(root: &Path, image: &CanonicalImage) -> PathBuf {
    root.join("engines").join(&image.engine).join(&image.tag)
}

pub fn base_dir(root: &Path, image: &CanonicalImage) -> PathBuf {
    engine_tag_dir(root, image).join("base")
}

pub fn states_dir(root: &Path, image: &CanonicalImage) -> PathBuf {
    engine_tag_dir(root, image).join("states")
}

pub fn state_dir(root: &Path, image: &CanonicalImage, state_id: &StateId) -> PathBuf {
    states_dir(root, image).join(state_id.as_str())
}

pub fn job_dir(root: &Path, job_id: &JobId) -> PathBuf {
    root.join("jobs").join(job_id.as_str())
}

pub fn job_runtime_dir(root: &Path, job_id: &JobId) -> PathBuf {
    job_dir(root, job_id).join("runtime")
}

/// Overlay backends mount the merged view under `<runtime_dir>/merged`
/// (§4.4 container-missing recovery: "prefer `<runtime_dir>/merged` if it
/// exists, else `<runtime_dir>`").
pub fn merged_dir(runtime_dir: &Path) -> PathBuf {
    runtime_dir.join("merged")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_spec_shape() {
        let root = Path::new("/store");
        let image = CanonicalImage::parse("postgres:15");
        assert_eq!(
            base_dir(root, &image),
            PathBuf::from("/store/engines/postgres/15/base")
        );
        assert_eq!(
            state_dir(root, &image, &StateId::new("abc")),
            PathBuf::from("/store/engines/postgres/15/states/abc")
        );
        assert_eq!(
            job_runtime_dir(root, &JobId::new("j1")),
            PathBuf::from("/store/jobs/j1/runtime")
        );
    }
}
