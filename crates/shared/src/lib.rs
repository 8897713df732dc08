//! 共享库
//!
//! 包含配置加载、启动错误分类和可观测性等基础设施代码。

pub mod config;
pub mod error;
pub mod observability;
