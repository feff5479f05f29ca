pub mod dyn_node;
pub mod ids;
pub mod lush;
pub mod metric;
pub mod node;
pub mod shared_str;
pub mod structure;

pub use dyn_node::{DynPayload, LM_ID_NULL, LoadModuleId, Vma};
pub use ids::{NULL_ID, NodeIdAllocator};
pub use lush::{AssocInfo, LogicalIp, LushAssoc};
pub use metric::{MetricDesc, MetricDescs, MetricKind, MetricValue};
pub use node::{Node, NodeData, NodeKind, ProcFrameView};
pub use shared_str::SharedStr;
pub use structure::{CodeScope, CodeStructure, Scope, StructureKind, StructureRef, downgrade};
