// nofx-core/src/model/artifact.rs
// ============================================================================
// Module: Artifact
// Description: The Artifact entity (§3).
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::ids::ArtifactId;
use crate::ids::RunId;
use crate::ids::StepId;
use crate::time::Timestamp;

/// Where an artifact's bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Bytes are stored as a local file under the run tree.
    LocalFile,
    /// Bytes are stored as an object in remote blob storage.
    BlobObject,
}

/// An artifact produced by a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact identifier.
    pub id: ArtifactId,
    /// Owning run.
    pub run_id: RunId,
    /// Producing step.
    pub step_id: StepId,
    /// Artifact name, used to derive the blob key `artifacts/<runId>/<stepId>/<name>`.
    pub name: String,
    /// Storage kind.
    pub kind: ArtifactKind,
    /// Local path or blob-storage URI, depending on `kind`.
    pub location: String,
    /// Creation time.
    pub created_at: Timestamp,
}

impl Artifact {
    /// Returns the stable blob key for this artifact, per §3: `artifacts/<runId>/<stepId>/<name>`.
    #[must_use]
    pub fn blob_key(&self) -> String {
        format!("artifacts/{}/{}/{}", self.run_id, self.step_id, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Timestamp;

    #[test]
    fn blob_key_matches_contract_shape() {
        let artifact = Artifact {
            id: ArtifactId::new("a1"),
            run_id: RunId::new("r1"),
            step_id: StepId::new("s1"),
            name: "report.json".into(),
            kind: ArtifactKind::BlobObject,
            location: "s3://bucket/whatever".into(),
            created_at: Timestamp::now(),
        };
        assert_eq!(artifact.blob_key(), "artifacts/r1/s1/report.json");
    }
}
