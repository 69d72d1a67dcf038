//! 工具层：Tool trait、描述符、注册表与最近邻索引

pub mod index;
pub mod library;
pub mod registry;

pub use index::ToolIndex;
pub use library::{AddTool, DivideTool, MultiplyTool};
pub use registry::{Tool, ToolDescriptor, ToolRegistry};
