// ==========================================
// 定制橱柜车间 ERP - 应用层
// ==========================================
// 职责: 装配连接、配置、仓储与服务
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};
