//! Opaque, newtype-wrapped identifiers.
//!
//! Entities never carry back-pointers into other entities; they carry ids.
//! The Store turns an id into a snapshot on demand (see the "arena+id
//! handles" design note).

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

opaque_id!(PatientId);
opaque_id!(InstitutionId);
opaque_id!(DiagnosisId);
opaque_id!(TreatmentId);
opaque_id!(QuestionnaireId);
opaque_id!(ItemId);
opaque_id!(LikertScaleId);
opaque_id!(RangeScaleId);
opaque_id!(ConstructScaleId);
opaque_id!(CompositeConstructScaleId);
opaque_id!(PatientQuestionnaireId);
opaque_id!(SubmissionId);
