// ==========================================
// 定制橱柜车间 ERP - 应用状态
// ==========================================
// 职责: 管理应用级别的共享连接、配置与服务实例
// ==========================================

use rusqlite::Connection;
use std::sync::{Arc, Mutex};

use crate::config::ConfigManager;
use crate::db::{init_schema, open_sqlite_connection, read_schema_version, CURRENT_SCHEMA_VERSION};
use crate::engine::{
    ChangeOrderEventPublisher, ChangeOrderService, EntityLockGateway, NotificationGateway,
    StopActionService,
};
use crate::repository::{ActionLogRepository, ProjectRepository};

/// 应用状态
///
/// 所有仓储与服务共享同一个连接
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    pub conn: Arc<Mutex<Connection>>,

    pub config: Arc<ConfigManager>,

    /// 变更单服务 (状态机)
    pub change_order_service: Arc<ChangeOrderService>,

    /// 止停动作服务 (查询 / 补执行 / 撤销)
    pub stop_action_service: Arc<StopActionService>,

    pub project_repo: Arc<ProjectRepository>,

    /// 操作日志仓储（用于审计追踪）
    pub action_log_repo: Arc<ActionLogRepository>,
}

impl AppState {
    /// 创建新的AppState实例 (使用默认网关)
    ///
    /// # 说明
    /// 该方法会：
    /// 1. 打开连接并确保 schema 已初始化
    /// 2. 初始化配置与仓储
    /// 3. 创建服务实例
    pub fn new(db_path: String) -> Result<Self, String> {
        Self::build(db_path, None, None, None)
    }

    /// 创建 AppState 并接入外部网关
    pub fn with_gateways(
        db_path: String,
        lock_gateway: Option<Arc<dyn EntityLockGateway>>,
        notifier: Option<Arc<dyn NotificationGateway>>,
        event_publisher: Option<Arc<dyn ChangeOrderEventPublisher>>,
    ) -> Result<Self, String> {
        Self::build(db_path, lock_gateway, notifier, event_publisher)
    }

    fn build(
        db_path: String,
        lock_gateway: Option<Arc<dyn EntityLockGateway>>,
        notifier: Option<Arc<dyn NotificationGateway>>,
        event_publisher: Option<Arc<dyn ChangeOrderEventPublisher>>,
    ) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = open_sqlite_connection(&db_path).map_err(|e| format!("无法打开数据库: {}", e))?;
        ensure_schema(&conn)?;
        let conn = Arc::new(Mutex::new(conn));

        let config = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );

        let mut change_order_service = ChangeOrderService::new(conn.clone(), config.clone());
        if let Some(gateway) = lock_gateway {
            change_order_service = change_order_service.with_lock_gateway(gateway);
        }
        if let Some(notifier) = notifier {
            change_order_service = change_order_service.with_notifier(notifier);
        }
        if let Some(publisher) = event_publisher {
            change_order_service = change_order_service.with_event_publisher(publisher);
        }

        let stop_action_service = Arc::new(StopActionService::new(conn.clone(), config.clone()));
        let project_repo = Arc::new(ProjectRepository::new(conn.clone()));
        let action_log_repo = Arc::new(ActionLogRepository::new(conn.clone()));

        tracing::info!("AppState初始化完成");

        Ok(Self {
            db_path,
            conn,
            config,
            change_order_service: Arc::new(change_order_service),
            stop_action_service,
            project_repo,
            action_log_repo,
        })
    }
}

/// 确保 schema 存在且版本匹配
fn ensure_schema(conn: &Connection) -> Result<(), String> {
    match read_schema_version(conn).map_err(|e| format!("读取 schema_version 失败: {}", e))? {
        Some(v) if v > CURRENT_SCHEMA_VERSION => Err(format!(
            "数据库 schema_version={} 高于当前程序支持的版本 {}",
            v, CURRENT_SCHEMA_VERSION
        )),
        Some(_) => Ok(()),
        None => {
            tracing::info!("数据库未初始化，创建 schema v{}", CURRENT_SCHEMA_VERSION);
            init_schema(conn).map_err(|e| format!("建表失败: {}", e))
        }
    }
}

/// 获取默认数据库路径
///
/// 优先级: 环境变量 CHANGE_ORDER_DB_PATH → 用户数据目录 → 当前目录
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    // 允许通过环境变量显式指定 DB 路径（便于调试/测试/CI）
    if let Ok(path) = std::env::var("CHANGE_ORDER_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./cabinet_change_order.db");

    if let Some(data_dir) = dirs::data_dir() {
        // 开发环境使用独立目录，避免污染生产数据
        #[cfg(debug_assertions)]
        {
            path = data_dir.join("cabinet-change-order-dev");
        }

        #[cfg(not(debug_assertions))]
        {
            path = data_dir.join("cabinet-change-order");
        }

        // 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&path).is_ok() {
            path = path.join("cabinet_change_order.db");
        } else {
            path = PathBuf::from("./cabinet_change_order.db");
        }
    }

    path.to_string_lossy().to_string()
}
