use std::sync::Arc;

use crate::identifier::TableAllowList;
use crate::traits::ConstraintResolver;
use crate::DatatransResult;

/// 已知表来源：配置中的静态白名单与元数据目录中加载到的表
#[derive(Clone)]
pub struct KnownTables {
    configured: Vec<String>,
    catalog: Arc<dyn ConstraintResolver>,
}

impl KnownTables {
    pub fn new(configured: Vec<String>, catalog: Arc<dyn ConstraintResolver>) -> Self {
        Self {
            configured,
            catalog,
        }
    }

    /// 当前的表白名单快照
    pub async fn snapshot(&self) -> DatatransResult<TableAllowList> {
        let mut allow_list = TableAllowList::new(self.configured.iter().cloned());
        allow_list.extend(self.catalog.known_tables().await?);
        Ok(allow_list)
    }
}
