//! Domain model for RTG Refit.
//!
//! Records mirrored from the remote project collections, the tolerant
//! inspection wire format, image references, and the sync error taxonomy.

pub mod defaults;
pub mod error;
pub mod images;
pub mod inspection;
pub mod record;
pub mod types;

pub use error::{RemoteWriteError, Result, SubscriptionError, SyncError, UploadError};
pub use images::ImageRef;
pub use inspection::{FindingsShape, InspectionRecord, ZoneFindings};
pub use record::{Entity, EntityKind, Record, RecordKey};
pub use types::{
    AmbientConditions, CoatingControl, ControlStatus, CorrosionPoint, EquipmentUnit, LayerStatus,
    PaintLayer, PaintingSystem, PhotoSetKey, PointDraft, Severity, UnitStatus, User, UserRole,
    WorkOrder, WorkOrderStatus, Zone,
};

pub use rtgrefit_ids::{
    CoatingControlId, IdParseError, InspectionId, PaintingSystemId, PointId, ScopeKey, UnitId,
    UserId, WorkOrderId, ZoneId,
};
