pub mod convert;
pub mod mcp;
