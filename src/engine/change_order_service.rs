// ==========================================
// 定制橱柜车间 ERP - 变更单服务 (状态机)
// ==========================================
// 状态机: draft → pending_approval → approved → applied
//                                 ↘ rejected   ↘ cancelled
// 红线: 每次迁移都以 (status, revision) 做 compare-and-swap, 失败整体回滚
// 红线: 止停级联严格在状态写为 approved 之后、同一事务内执行
// 红线: 事件与通知只在提交后发出, 失败只告警
// 红线: 每次迁移都写 action_log (与业务写入同事务)
// ==========================================

use rusqlite::{Connection, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::config::{ChangeOrderSettings, ConfigManager, StaleValuePolicy};
use crate::db::now_ts;
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::change_order::{
    BomDelta, ChangeOrder, ChangeOrderLine, NewChangeOrder, NewChangeOrderLine,
};
use crate::domain::impact::ImpactPreview;
use crate::domain::project::Project;
use crate::domain::stop_action::{RevertSummary, StopActionSummary};
use crate::domain::types::ChangeOrderStatus;
use crate::engine::entity_registry::EntityRegistry;
use crate::engine::error::{ChangeOrderError, ChangeOrderResult};
use crate::engine::events::{ChangeOrderEvent, ChangeOrderEventPublisher, ChangeOrderEventType, OptionalEventPublisher};
use crate::engine::lock_gateway::{EntityLockGateway, NoOpLockGateway};
use crate::engine::notification::{notify_best_effort, ChangeOrderNotification, NotificationGateway, TracingNotifier};
use crate::engine::stop_action_service::StopActionService;
use crate::repository::{
    ActionLogRepository, ChangeOrderRepository, EntityFieldRepository, ProjectRepository,
    RepositoryError,
};

// ==========================================
// 操作结果
// ==========================================

/// 批准结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub change_order: ChangeOrder,
    pub stop_actions: StopActionSummary,
}

/// 应用结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub change_order: ChangeOrder,
    pub lines_applied: usize,
    /// 目标实体/字段无法解析或已不存在而跳过的行
    pub lines_skipped: usize,
    /// 当前值与快照不一致但仍被覆盖的行
    pub stale_overwritten: usize,
    pub reverted: RevertSummary,
}

/// 取消结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub change_order: ChangeOrder,
    /// 仅当取消前为 approved 时存在
    pub reverted: Option<RevertSummary>,
}

// ==========================================
// ChangeOrderService
// ==========================================
pub struct ChangeOrderService {
    conn: Arc<Mutex<Connection>>,
    config: Arc<ConfigManager>,
    lock_gateway: Arc<dyn EntityLockGateway>,
    notifier: Arc<dyn NotificationGateway>,
    events: OptionalEventPublisher,
}

impl ChangeOrderService {
    /// 创建服务 (默认: 空操作锁网关 + 日志通知 + 不发布事件)
    pub fn new(conn: Arc<Mutex<Connection>>, config: Arc<ConfigManager>) -> Self {
        Self {
            conn,
            config,
            lock_gateway: Arc::new(NoOpLockGateway),
            notifier: Arc::new(TracingNotifier),
            events: OptionalEventPublisher::none(),
        }
    }

    pub fn with_lock_gateway(mut self, gateway: Arc<dyn EntityLockGateway>) -> Self {
        self.lock_gateway = gateway;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationGateway>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_event_publisher(mut self, publisher: Arc<dyn ChangeOrderEventPublisher>) -> Self {
        self.events = OptionalEventPublisher::with_publisher(publisher);
        self
    }

    fn lock_conn(&self) -> ChangeOrderResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()).into())
    }

    /// 读取配置 (必须在获取连接锁之前调用, ConfigManager 共享同一连接)
    fn load_settings(&self) -> ChangeOrderResult<ChangeOrderSettings> {
        self.config
            .load_settings()
            .map_err(|e| ChangeOrderError::Config(e.to_string()))
    }

    // ==========================================
    // 创建 / 编辑
    // ==========================================

    /// 创建变更单 (草稿), 可同时带入行项目
    pub fn create(&self, project_id: &str, data: NewChangeOrder, actor: &str) -> ChangeOrderResult<ChangeOrder> {
        let title = data.title.trim();
        if title.is_empty() {
            return Err(ChangeOrderError::Validation("变更单标题不能为空".to_string()));
        }
        for line in &data.lines {
            validate_line(line)?;
        }

        let settings = self.load_settings()?;
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        let project = ProjectRepository::get_project_tx(&tx, project_id)?;
        let seq_no = ChangeOrderRepository::next_seq_no_tx(&tx, project_id)?;
        let now = now_ts();

        let co = ChangeOrder {
            change_order_id: uuid::Uuid::new_v4().to_string(),
            project_id: project.project_id.clone(),
            change_order_number: change_order_number(&settings.number_prefix, &project, seq_no),
            title: title.to_string(),
            description: data.description.clone(),
            reason: data.reason.unwrap_or_default(),
            status: ChangeOrderStatus::Draft,
            affected_stage: data.affected_stage.clone().or_else(|| project.stage_key.clone()),
            unlocks_gate: data.unlocks_gate.clone(),
            price_delta: rust_decimal::Decimal::ZERO,
            bom_delta: BomDelta::default(),
            requested_by: actor.to_string(),
            requested_at: now,
            approved_by: None,
            approved_at: None,
            approval_notes: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            applied_by: None,
            applied_at: None,
            cancelled_by: None,
            cancelled_at: None,
            revision: 1,
            created_at: now,
            updated_at: now,
        };
        ChangeOrderRepository::insert_tx(&tx, &co, seq_no)?;

        for (idx, line_data) in data.lines.iter().enumerate() {
            let line = build_line(&tx, &co, idx as i32 + 1, line_data)?;
            ChangeOrderRepository::insert_line_tx(&tx, &line)?;
        }
        if !data.lines.is_empty() {
            ChangeOrderRepository::recalculate_totals_tx(&tx, &co.change_order_id)?;
        }

        let co = ChangeOrderRepository::get_tx(&tx, &co.change_order_id)?;
        let log = ActionLog::new(ActionType::CreateChangeOrder, actor)
            .for_change_order(&co.change_order_id, &co.project_id)
            .with_payload(&json!({
                "change_order_number": co.change_order_number,
                "reason": co.reason,
                "lines": data.lines.len(),
                "price_delta": co.price_delta,
            }))
            .with_detail(format!("创建变更单 {}", co.change_order_number));
        ActionLogRepository::insert_tx(&tx, &log)?;

        tx.commit()?;

        info!(
            change_order_id = %co.change_order_id,
            project_id = %co.project_id,
            change_order_number = %co.change_order_number,
            actor = %actor,
            lines = data.lines.len(),
            "变更单已创建"
        );
        self.events.publish_best_effort(ChangeOrderEvent::new(
            &co.change_order_id,
            &co.project_id,
            ChangeOrderEventType::Created,
            actor,
        ));

        Ok(co)
    }

    /// 增加行项目 (仅草稿), 并重算汇总
    pub fn add_line(
        &self,
        change_order_id: &str,
        data: NewChangeOrderLine,
        actor: &str,
    ) -> ChangeOrderResult<ChangeOrderLine> {
        validate_line(&data)?;

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        let co = ChangeOrderRepository::get_tx(&tx, change_order_id)?;
        if !co.can_be_edited() {
            return Err(ChangeOrderError::NotEditable {
                change_order_id: co.change_order_id,
                status: co.status,
            });
        }

        let line_no = ChangeOrderRepository::next_line_no_tx(&tx, change_order_id)?;
        let line = build_line(&tx, &co, line_no, &data)?;
        ChangeOrderRepository::insert_line_tx(&tx, &line)?;
        let (price_delta, _) = ChangeOrderRepository::recalculate_totals_tx(&tx, change_order_id)?;

        let log = ActionLog::new(ActionType::AddLine, actor)
            .for_change_order(&co.change_order_id, &co.project_id)
            .with_payload(&line)
            .with_detail(format!(
                "新增行项目 #{}: {}.{}",
                line.line_no,
                line.entity_label(),
                line.field_name
            ));
        ActionLogRepository::insert_tx(&tx, &log)?;

        tx.commit()?;

        info!(
            change_order_id = %co.change_order_id,
            project_id = %co.project_id,
            actor = %actor,
            line_no = line.line_no,
            price_delta = %price_delta,
            "变更单行项目已添加"
        );
        Ok(line)
    }

    // ==========================================
    // 状态迁移
    // ==========================================

    /// 提交审批 (draft → pending_approval)
    pub fn submit_for_approval(&self, change_order_id: &str, actor: &str) -> ChangeOrderResult<ChangeOrder> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        let mut co = load_for_transition(&tx, change_order_id, ChangeOrder::can_be_submitted, "submit")?;
        let from = co.status;
        co.status = ChangeOrderStatus::PendingApproval;
        co.updated_at = now_ts();
        co.revision = ChangeOrderRepository::transition_tx(&tx, &co, from)?;

        write_transition_log(&tx, &co, ActionType::Submit, actor, from, json!({}))?;
        tx.commit()?;

        info!(change_order_id = %co.change_order_id, project_id = %co.project_id, actor = %actor, "变更单已提交审批");
        notify_best_effort(self.notifier.as_ref(), ChangeOrderNotification::submitted(&co, actor));
        self.events.publish_best_effort(ChangeOrderEvent::new(
            &co.change_order_id,
            &co.project_id,
            ChangeOrderEventType::Submitted,
            actor,
        ));
        Ok(co)
    }

    /// 批准 (pending_approval → approved)
    ///
    /// 同一事务内依次执行: 状态 CAS → 解锁实体 → 止停动作
    pub fn approve(
        &self,
        change_order_id: &str,
        actor: &str,
        notes: Option<&str>,
    ) -> ChangeOrderResult<ApprovalOutcome> {
        let settings = self.load_settings()?;
        let config_snapshot = self
            .config
            .get_config_snapshot()
            .map_err(|e| ChangeOrderError::Config(e.to_string()))?;

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        let mut co = load_for_transition(&tx, change_order_id, ChangeOrder::can_be_approved, "approve")?;

        if settings.enforce_single_active {
            let project = ProjectRepository::get_project_tx(&tx, &co.project_id)?;
            if project.is_cascading_other(&co.change_order_id) {
                return Err(ChangeOrderError::ActiveChangeOrderConflict {
                    project_id: project.project_id,
                    active_change_order_id: project.active_change_order_id.unwrap_or_default(),
                });
            }
        }

        let from = co.status;
        let now = now_ts();
        co.status = ChangeOrderStatus::Approved;
        co.approved_by = Some(actor.to_string());
        co.approved_at = Some(now);
        co.approval_notes = notes.map(str::to_string).filter(|n| !n.trim().is_empty());
        co.updated_at = now;
        co.revision = ChangeOrderRepository::transition_tx(&tx, &co, from)?;

        let lines = ChangeOrderRepository::find_lines_tx(&tx, &co.change_order_id)?;
        let unlocked = self
            .lock_gateway
            .unlock_for_change_order(&co, &lines)
            .map_err(|e| ChangeOrderError::LockGateway(e.to_string()))?;

        let stop_actions = StopActionService::execute_stop_actions_tx(&tx, &co, actor, &settings)?;

        write_transition_log(
            &tx,
            &co,
            ActionType::Approve,
            actor,
            from,
            json!({
                "notes": co.approval_notes,
                "entities_unlocked": unlocked,
                "stop_actions": stop_actions,
                "config_snapshot": serde_json::from_str::<serde_json::Value>(&config_snapshot).unwrap_or_default(),
            }),
        )?;
        tx.commit()?;

        info!(
            change_order_id = %co.change_order_id,
            project_id = %co.project_id,
            actor = %actor,
            entities_unlocked = unlocked,
            tasks_blocked = stop_actions.tasks_blocked,
            pos_held = stop_actions.pos_held,
            delivery_blocked = stop_actions.delivery_blocked,
            "变更单已批准"
        );
        notify_best_effort(
            self.notifier.as_ref(),
            ChangeOrderNotification::approved(&co, actor, &stop_actions),
        );
        self.events.publish_best_effort(
            ChangeOrderEvent::new(&co.change_order_id, &co.project_id, ChangeOrderEventType::Approved, actor)
                .with_stop_actions(stop_actions.clone()),
        );

        Ok(ApprovalOutcome {
            change_order: co,
            stop_actions,
        })
    }

    /// 驳回 (pending_approval → rejected), 无级联
    pub fn reject(&self, change_order_id: &str, actor: &str, reason: &str) -> ChangeOrderResult<ChangeOrder> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ChangeOrderError::Validation("驳回原因不能为空".to_string()));
        }

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        let mut co = load_for_transition(&tx, change_order_id, ChangeOrder::can_be_rejected, "reject")?;
        let from = co.status;
        let now = now_ts();
        co.status = ChangeOrderStatus::Rejected;
        co.rejected_by = Some(actor.to_string());
        co.rejected_at = Some(now);
        co.rejection_reason = Some(reason.to_string());
        co.updated_at = now;
        co.revision = ChangeOrderRepository::transition_tx(&tx, &co, from)?;

        write_transition_log(&tx, &co, ActionType::Reject, actor, from, json!({ "reason": reason }))?;
        tx.commit()?;

        info!(change_order_id = %co.change_order_id, project_id = %co.project_id, actor = %actor, "变更单已驳回");
        self.events.publish_best_effort(ChangeOrderEvent::new(
            &co.change_order_id,
            &co.project_id,
            ChangeOrderEventType::Rejected,
            actor,
        ));
        Ok(co)
    }

    /// 应用 (approved → applied)
    ///
    /// 同一事务内依次执行: 写入各行 new_value → 重新冻结实体 → 状态 CAS → 撤销止停动作
    pub fn apply(&self, change_order_id: &str, actor: &str) -> ChangeOrderResult<ApplyOutcome> {
        let settings = self.load_settings()?;
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        let mut co = load_for_transition(&tx, change_order_id, ChangeOrder::can_be_applied, "apply")?;

        let applied_at = now_ts();
        // 本次应用已写入的字段值, 同一字段的后续行以此为期望值
        let mut written: HashMap<(&'static str, String, &'static str), Option<String>> = HashMap::new();
        let mut lines_applied = 0;
        let mut lines_skipped = 0;
        let mut stale_overwritten = 0;

        for line in ChangeOrderRepository::find_unapplied_lines_tx(&tx, &co.change_order_id)? {
            let field = match EntityRegistry::resolve_field(&line.entity_type, &line.field_name) {
                Some(field) => field,
                None => {
                    warn!(
                        change_order_id = %co.change_order_id,
                        line_no = line.line_no,
                        entity_type = %line.entity_type,
                        field_name = %line.field_name,
                        "应用变更: 未登记的实体类型或字段, 跳过该行"
                    );
                    lines_skipped += 1;
                    continue;
                }
            };

            let current = match EntityFieldRepository::read_field_tx(
                &tx,
                field.table(),
                field.key_column(),
                field.column,
                &line.entity_id,
            )? {
                Some(current) => current,
                None => {
                    warn!(
                        change_order_id = %co.change_order_id,
                        line_no = line.line_no,
                        entity = %line.entity_label(),
                        "应用变更: 目标实体已不存在, 跳过该行"
                    );
                    lines_skipped += 1;
                    continue;
                }
            };

            let key = (field.table(), line.entity_id.clone(), field.column);
            let expected = match written.get(&key) {
                Some(value) => value.clone(),
                None => line.old_value.clone(),
            };
            if current != expected {
                warn!(
                    change_order_id = %co.change_order_id,
                    line_no = line.line_no,
                    entity = %line.entity_label(),
                    field_name = %line.field_name,
                    expected = ?expected,
                    current = ?current,
                    policy = %settings.stale_value_policy,
                    "应用变更: 目标字段已在建行后被修改"
                );
                if settings.stale_value_policy == StaleValuePolicy::Reject {
                    return Err(ChangeOrderError::StaleLineValue {
                        line_id: line.line_id,
                        entity: line.entity_type,
                        field: line.field_name,
                        expected,
                        actual: current,
                    });
                }
                stale_overwritten += 1;
            }

            EntityFieldRepository::write_field_tx(
                &tx,
                field.table(),
                field.key_column(),
                field.column,
                &line.entity_id,
                line.new_value.as_deref(),
            )?;
            ChangeOrderRepository::mark_line_applied_tx(&tx, &line.line_id, &applied_at)?;
            let stored = EntityFieldRepository::read_field_tx(
                &tx,
                field.table(),
                field.key_column(),
                field.column,
                &line.entity_id,
            )?
            .flatten();
            written.insert(key, stored);
            lines_applied += 1;
        }

        let lines = ChangeOrderRepository::find_lines_tx(&tx, &co.change_order_id)?;
        let relocked = self
            .lock_gateway
            .relock_after_change_order(&co, &lines)
            .map_err(|e| ChangeOrderError::LockGateway(e.to_string()))?;

        let from = co.status;
        co.status = ChangeOrderStatus::Applied;
        co.applied_by = Some(actor.to_string());
        co.applied_at = Some(applied_at);
        co.updated_at = applied_at;
        co.revision = ChangeOrderRepository::transition_tx(&tx, &co, from)?;

        let reverted = StopActionService::revert_stop_actions_tx(&tx, &co, actor, &settings)?;

        write_transition_log(
            &tx,
            &co,
            ActionType::Apply,
            actor,
            from,
            json!({
                "lines_applied": lines_applied,
                "lines_skipped": lines_skipped,
                "stale_overwritten": stale_overwritten,
                "entities_relocked": relocked,
            }),
        )?;
        tx.commit()?;

        info!(
            change_order_id = %co.change_order_id,
            project_id = %co.project_id,
            actor = %actor,
            lines_applied,
            lines_skipped,
            stale_overwritten,
            tasks_unblocked = reverted.tasks_unblocked,
            pos_released = reverted.pos_released,
            "变更单已应用"
        );
        notify_best_effort(self.notifier.as_ref(), ChangeOrderNotification::applied(&co, actor));
        self.events.publish_best_effort(
            ChangeOrderEvent::new(&co.change_order_id, &co.project_id, ChangeOrderEventType::Applied, actor)
                .with_reverted(reverted.clone()),
        );

        Ok(ApplyOutcome {
            change_order: co,
            lines_applied,
            lines_skipped,
            stale_overwritten,
            reverted,
        })
    }

    /// 取消 (任意非终态 → cancelled)
    ///
    /// 已批准的变更单: 重新冻结实体, 并在同一事务内撤销止停动作
    pub fn cancel(&self, change_order_id: &str, actor: &str) -> ChangeOrderResult<CancelOutcome> {
        let settings = self.load_settings()?;
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        let mut co = load_for_transition(&tx, change_order_id, |co| !co.is_complete(), "cancel")?;
        let from = co.status;
        let was_approved = from == ChangeOrderStatus::Approved;

        let mut relocked = 0;
        if was_approved {
            let lines = ChangeOrderRepository::find_lines_tx(&tx, &co.change_order_id)?;
            relocked = self
                .lock_gateway
                .relock_after_change_order(&co, &lines)
                .map_err(|e| ChangeOrderError::LockGateway(e.to_string()))?;
        }

        let now = now_ts();
        co.status = ChangeOrderStatus::Cancelled;
        co.cancelled_by = Some(actor.to_string());
        co.cancelled_at = Some(now);
        co.updated_at = now;
        co.revision = ChangeOrderRepository::transition_tx(&tx, &co, from)?;

        let reverted = if was_approved {
            Some(StopActionService::revert_stop_actions_tx(&tx, &co, actor, &settings)?)
        } else {
            None
        };

        write_transition_log(
            &tx,
            &co,
            ActionType::Cancel,
            actor,
            from,
            json!({ "entities_relocked": relocked, "reverted": reverted }),
        )?;
        tx.commit()?;

        info!(
            change_order_id = %co.change_order_id,
            project_id = %co.project_id,
            actor = %actor,
            from = %from,
            "变更单已取消"
        );
        notify_best_effort(self.notifier.as_ref(), ChangeOrderNotification::cancelled(&co, actor));
        let mut event = ChangeOrderEvent::new(&co.change_order_id, &co.project_id, ChangeOrderEventType::Cancelled, actor);
        if let Some(summary) = &reverted {
            event = event.with_reverted(summary.clone());
        }
        self.events.publish_best_effort(event);

        Ok(CancelOutcome {
            change_order: co,
            reverted,
        })
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 影响预览 (只读)
    pub fn preview_impact(&self, change_order_id: &str) -> ChangeOrderResult<ImpactPreview> {
        let conn = self.lock_conn()?;
        let co = ChangeOrderRepository::get_tx(&conn, change_order_id)?;
        let lines = ChangeOrderRepository::find_lines_tx(&conn, change_order_id)?;
        Ok(ImpactPreview::build(&co, &lines))
    }

    pub fn find_by_id(&self, change_order_id: &str) -> ChangeOrderResult<Option<ChangeOrder>> {
        let conn = self.lock_conn()?;
        Ok(ChangeOrderRepository::find_by_id_tx(&conn, change_order_id)?)
    }

    pub fn list_for_project(&self, project_id: &str) -> ChangeOrderResult<Vec<ChangeOrder>> {
        Ok(ChangeOrderRepository::new(self.conn.clone()).list_for_project(project_id)?)
    }

    pub fn lines(&self, change_order_id: &str) -> ChangeOrderResult<Vec<ChangeOrderLine>> {
        Ok(ChangeOrderRepository::new(self.conn.clone()).find_lines(change_order_id)?)
    }
}

// ==========================================
// 辅助函数
// ==========================================

/// 变更单编号: {前缀}-{项目编号或项目ID前缀}-{流水号:03}
fn change_order_number(prefix: &str, project: &Project, seq_no: i32) -> String {
    let project_part = project
        .project_number
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| project.project_id.chars().take(8).collect());
    format!("{}-{}-{:03}", prefix, project_part, seq_no)
}

fn validate_line(line: &NewChangeOrderLine) -> ChangeOrderResult<()> {
    if line.entity_type.trim().is_empty() || line.entity_id.trim().is_empty() || line.field_name.trim().is_empty() {
        return Err(ChangeOrderError::Validation(
            "行项目必须指定 entity_type / entity_id / field_name".to_string(),
        ));
    }
    Ok(())
}

/// 读取并校验可迁移状态
fn load_for_transition(
    tx: &Transaction,
    change_order_id: &str,
    allowed: impl Fn(&ChangeOrder) -> bool,
    action: &'static str,
) -> ChangeOrderResult<ChangeOrder> {
    let co = ChangeOrderRepository::get_tx(tx, change_order_id)?;
    if !allowed(&co) {
        return Err(ChangeOrderError::InvalidTransition {
            change_order_id: co.change_order_id,
            from: co.status,
            action,
        });
    }
    Ok(co)
}

/// 构造行项目, old_value 取自目标实体当前值
///
/// 实体/字段无法解析或实体不存在时告警, old_value 记为空
fn build_line(
    conn: &Connection,
    co: &ChangeOrder,
    line_no: i32,
    data: &NewChangeOrderLine,
) -> ChangeOrderResult<ChangeOrderLine> {
    let entity_type = data.entity_type.trim();
    let field_name = data.field_name.trim();

    let resolved = EntityRegistry::resolve_field(entity_type, field_name);
    let new_value = match resolved {
        Some(field) => data.new_value.as_deref().map(|v| field.normalize(v)),
        None => data.new_value.clone(),
    };

    let old_value = match resolved {
        None => {
            warn!(
                change_order_id = %co.change_order_id,
                entity_type = %entity_type,
                field_name = %field_name,
                "新增行项目: 未登记的实体类型或字段, old_value 记为空"
            );
            None
        }
        Some(field) => {
            match EntityFieldRepository::read_field_tx(
                conn,
                field.table(),
                field.key_column(),
                field.column,
                &data.entity_id,
            )? {
                Some(current) => current,
                None => {
                    warn!(
                        change_order_id = %co.change_order_id,
                        entity_type = %entity_type,
                        entity_id = %data.entity_id,
                        "新增行项目: 目标实体不存在, old_value 记为空"
                    );
                    None
                }
            }
        }
    };

    Ok(ChangeOrderLine {
        line_id: uuid::Uuid::new_v4().to_string(),
        change_order_id: co.change_order_id.clone(),
        line_no,
        entity_type: entity_type.to_string(),
        entity_id: data.entity_id.trim().to_string(),
        field_name: field_name.to_string(),
        old_value,
        new_value,
        price_impact: data.price_impact,
        bom_impact: data.bom_impact.clone().filter(|b| !b.is_empty()),
        is_applied: false,
        applied_at: None,
        created_at: now_ts(),
    })
}

fn write_transition_log(
    tx: &Transaction,
    co: &ChangeOrder,
    action_type: ActionType,
    actor: &str,
    from: ChangeOrderStatus,
    extra: serde_json::Value,
) -> ChangeOrderResult<()> {
    let log = ActionLog::new(action_type, actor)
        .for_change_order(&co.change_order_id, &co.project_id)
        .with_payload(&json!({
            "from": from,
            "to": co.status,
            "revision": co.revision,
            "detail": extra,
        }))
        .with_detail(format!(
            "变更单 {}: {} → {}",
            co.change_order_number,
            from.label(),
            co.status.label()
        ));
    ActionLogRepository::insert_tx(tx, &log)?;
    Ok(())
}
