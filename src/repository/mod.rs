// ==========================================
// 定制橱柜车间 ERP - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// 约定: *_tx 关联函数由服务层在同一事务内组合调用
// ==========================================

pub mod action_log_repo;
pub mod change_order_repo;
pub mod entity_field_repo;
pub mod error;
pub mod project_repo;
pub(crate) mod row_codec;
pub mod stop_action_repo;

// 重导出核心仓储
pub use action_log_repo::ActionLogRepository;
pub use change_order_repo::ChangeOrderRepository;
pub use entity_field_repo::EntityFieldRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use project_repo::ProjectRepository;
pub use stop_action_repo::StopActionRepository;
