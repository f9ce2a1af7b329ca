// ==========================================
// 定制橱柜车间 ERP - 变更单领域事件发布
// ==========================================
// 职责: 定义变更单事件发布 trait，实现依赖倒置
// 说明: 引擎只在事务提交后发布事件; 发布失败不影响工作流状态
// 说明: 止停级联由服务层显式编排, 不依赖事件监听器触发
// ==========================================

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;

use crate::domain::stop_action::{RevertSummary, StopActionSummary};

// ==========================================
// 变更单事件类型
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOrderEventType {
    /// 变更单创建
    Created,
    /// 提交审批
    Submitted,
    /// 批准 (止停动作已执行)
    Approved,
    /// 驳回
    Rejected,
    /// 已应用 (止停动作已撤销)
    Applied,
    /// 取消
    Cancelled,
}

impl ChangeOrderEventType {
    /// 转换为字符串标识
    pub fn as_str(&self) -> &str {
        match self {
            ChangeOrderEventType::Created => "ChangeOrderCreated",
            ChangeOrderEventType::Submitted => "ChangeOrderSubmitted",
            ChangeOrderEventType::Approved => "ChangeOrderApproved",
            ChangeOrderEventType::Rejected => "ChangeOrderRejected",
            ChangeOrderEventType::Applied => "ChangeOrderApplied",
            ChangeOrderEventType::Cancelled => "ChangeOrderCancelled",
        }
    }
}

/// 变更单事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeOrderEvent {
    pub change_order_id: String,
    pub project_id: String,
    pub event_type: ChangeOrderEventType,
    /// 触发操作的用户
    pub actor: String,
    /// 批准时执行的止停动作
    pub stop_actions: Option<StopActionSummary>,
    /// 应用/取消时撤销的止停动作
    pub reverted: Option<RevertSummary>,
}

impl ChangeOrderEvent {
    pub fn new(
        change_order_id: &str,
        project_id: &str,
        event_type: ChangeOrderEventType,
        actor: &str,
    ) -> Self {
        Self {
            change_order_id: change_order_id.to_string(),
            project_id: project_id.to_string(),
            event_type,
            actor: actor.to_string(),
            stop_actions: None,
            reverted: None,
        }
    }

    pub fn with_stop_actions(mut self, summary: StopActionSummary) -> Self {
        self.stop_actions = Some(summary);
        self
    }

    pub fn with_reverted(mut self, summary: RevertSummary) -> Self {
        self.reverted = Some(summary);
        self
    }
}

// ==========================================
// 事件发布 Trait
// ==========================================

/// 变更单事件发布者 Trait
///
/// 引擎层定义，外部系统 (看板刷新、报表、消息队列) 实现
pub trait ChangeOrderEventPublisher: Send + Sync {
    /// 发布变更单事件
    ///
    /// # 返回
    /// - `Ok(id)`: 下游生成的标识（如果支持）或空字符串
    /// - `Err`: 发布失败
    fn publish(&self, event: ChangeOrderEvent) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// 空操作事件发布者
///
/// 用于不需要事件发布的场景（如单元测试）
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl ChangeOrderEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: ChangeOrderEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpEventPublisher: 跳过事件发布 - change_order_id={}, event_type={}",
            event.change_order_id,
            event.event_type.as_str()
        );
        Ok(String::new())
    }
}

/// 可选的事件发布者包装
///
/// 简化 Option<Arc<dyn ChangeOrderEventPublisher>> 的使用
pub struct OptionalEventPublisher {
    inner: Option<Arc<dyn ChangeOrderEventPublisher>>,
}

impl OptionalEventPublisher {
    /// 创建带发布者的实例
    pub fn with_publisher(publisher: Arc<dyn ChangeOrderEventPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    /// 创建空实例（不发布事件）
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 发布事件（如果有发布者）
    pub fn publish(&self, event: ChangeOrderEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        match &self.inner {
            Some(publisher) => publisher.publish(event),
            None => {
                tracing::debug!(
                    "OptionalEventPublisher: 未配置发布者，跳过事件 - change_order_id={}, event_type={}",
                    event.change_order_id,
                    event.event_type.as_str()
                );
                Ok(String::new())
            }
        }
    }

    /// 发布事件, 失败仅告警 (事务已提交, 不可回滚)
    pub fn publish_best_effort(&self, event: ChangeOrderEvent) {
        let change_order_id = event.change_order_id.clone();
        let event_type = event.event_type;
        if let Err(e) = self.publish(event) {
            tracing::warn!(
                change_order_id = %change_order_id,
                event_type = event_type.as_str(),
                error = %e,
                "变更单事件发布失败（已忽略）"
            );
        }
    }

    /// 检查是否配置了发布者
    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalEventPublisher {
    fn default() -> Self {
        Self::none()
    }
}
