//! 工具索引：最近邻检索
//!
//! 定容量的 (向量, 工具描述符) 存储，用于在大工具目录下只向 prompt 暴露与查询最相关的
//! top-k 工具，控制上下文占用。查询是对前 count 个槽位的线性欧氏距离扫描，O(count)；
//! 工具目录通常只有几十到几百项，不需要空间索引。如需生产规模可替换为近似索引，
//! 可观测契约（升序距离、稳定并列序）不变。

use crate::error::AgentError;
use crate::tools::ToolDescriptor;

/// 定容量最近邻索引；构建后只读，可在并发 agent 运行间共享
pub struct ToolIndex {
    dim: usize,
    max_size: usize,
    vectors: Vec<Vec<f32>>,
    meta: Vec<ToolDescriptor>,
    count: usize,
}

impl ToolIndex {
    pub fn new(dim: usize, max_size: usize) -> Self {
        Self {
            dim,
            max_size,
            vectors: Vec::with_capacity(max_size),
            meta: Vec::with_capacity(max_size),
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// 在下一个空槽位追加；count == max_size 时返回 IndexCapacityExceeded，
    /// 向量维度不符时返回 DimensionMismatch
    pub fn insert(&mut self, vector: Vec<f32>, tool: ToolDescriptor) -> Result<(), AgentError> {
        if self.count == self.max_size {
            return Err(AgentError::IndexCapacityExceeded(self.max_size));
        }
        if vector.len() != self.dim {
            return Err(AgentError::DimensionMismatch {
                expected: self.dim,
                got: vector.len(),
            });
        }
        self.vectors.push(vector);
        self.meta.push(tool);
        self.count += 1;
        Ok(())
    }

    /// 返回与 query 欧氏距离最小的 min(k, count) 个工具，升序；并列按插入顺序（稳定排序）
    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<ToolDescriptor>, AgentError> {
        if query.len() != self.dim {
            return Err(AgentError::DimensionMismatch {
                expected: self.dim,
                got: query.len(),
            });
        }
        let mut order: Vec<(usize, f32)> = self.vectors[..self.count]
            .iter()
            .enumerate()
            .map(|(i, v)| (i, euclidean(v, query)))
            .collect();
        order.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(order
            .into_iter()
            .take(k)
            .map(|(i, _)| self.meta[i].clone())
            .collect())
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::registry::Tool;
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use std::sync::Arc;

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }

        fn signature(&self) -> &str {
            "def tool() -> None"
        }

        fn description(&self) -> &str {
            "test tool"
        }

        async fn call(&self, _args: Vec<Value>, _kwargs: Map<String, Value>) -> Result<Value, String> {
            Ok(Value::Null)
        }
    }

    fn descriptor(name: &'static str) -> ToolDescriptor {
        ToolDescriptor::new(Arc::new(NamedTool(name)))
    }

    #[test]
    fn test_insert_beyond_capacity_fails() {
        let mut index = ToolIndex::new(2, 1);
        index.insert(vec![0.0, 0.0], descriptor("a")).unwrap();
        let err = index.insert(vec![1.0, 1.0], descriptor("b")).unwrap_err();
        assert!(matches!(err, AgentError::IndexCapacityExceeded(1)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut index = ToolIndex::new(3, 4);
        let err = index.insert(vec![0.0, 0.0], descriptor("a")).unwrap_err();
        assert!(matches!(
            err,
            AgentError::DimensionMismatch { expected: 3, got: 2 }
        ));
    }

    #[test]
    fn test_nearest_sorted_ascending() {
        let mut index = ToolIndex::new(2, 8);
        index.insert(vec![0.0, 0.0], descriptor("origin")).unwrap();
        index.insert(vec![3.0, 4.0], descriptor("far")).unwrap();
        index.insert(vec![1.0, 0.0], descriptor("near")).unwrap();

        let hits = index.nearest(&[0.1, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].name(), "origin");
        assert_eq!(hits[1].name(), "near");
    }

    #[test]
    fn test_exact_match_returned_first() {
        let mut index = ToolIndex::new(2, 8);
        index.insert(vec![5.0, 5.0], descriptor("a")).unwrap();
        index.insert(vec![1.0, 2.0], descriptor("b")).unwrap();

        let hits = index.nearest(&[1.0, 2.0], 1).unwrap();
        assert_eq!(hits[0].name(), "b");
    }

    #[test]
    fn test_k_capped_at_count_and_ties_by_insertion_order() {
        let mut index = ToolIndex::new(2, 8);
        index.insert(vec![1.0, 0.0], descriptor("first")).unwrap();
        index.insert(vec![0.0, 1.0], descriptor("second")).unwrap();

        // 等距并列：插入顺序在前者优先
        let hits = index.nearest(&[0.0, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].name(), "first");
        assert_eq!(hits[1].name(), "second");
    }
}
