// ==========================================
// 定制橱柜车间 ERP - 操作日志数据仓储
// ==========================================
// 对齐: action_log 表
// 红线: 变更单的每一次状态迁移都必须与业务写入同事务落库
// ==========================================

mod core;
mod queries;

#[cfg(test)]
mod tests;

pub use core::ActionLogRepository;
