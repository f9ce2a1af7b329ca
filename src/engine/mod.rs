// ==========================================
// 定制橱柜车间 ERP - 引擎层
// ==========================================
// 职责: 变更单状态机、止停动作级联、外部网关接口
// 红线: Engine 不拼业务 SQL, 数据访问全部经由 repository 的 *_tx 函数
// ==========================================

pub mod change_order_service;
pub mod entity_registry;
pub mod error;
pub mod events;
pub mod lock_gateway;
pub mod notification;
pub mod stop_action_service;

// 重导出核心引擎
pub use change_order_service::{ApplyOutcome, ApprovalOutcome, CancelOutcome, ChangeOrderService};
pub use entity_registry::{EntityDescriptor, EntityRegistry, FieldRef};
pub use error::{ChangeOrderError, ChangeOrderResult};
pub use events::{
    ChangeOrderEvent, ChangeOrderEventPublisher, ChangeOrderEventType, NoOpEventPublisher,
    OptionalEventPublisher,
};
pub use lock_gateway::{EntityLockGateway, NoOpLockGateway};
pub use notification::{
    notify_best_effort, ChangeOrderNotification, NotificationGateway, NotificationKind,
    TracingNotifier,
};
pub use stop_action_service::StopActionService;
