//! Per-cluster course rollups
//!
//! Folds individual cluster assignments and per-lecture concept insights
//! into one [`ClusterInsight`] per cohort present in the course.

use super::{CancelToken, ClusterAssignment};
use crate::error::{Error, Result};
use crate::types::{BehavioralCluster, ClusterInsight, ConceptInsight};
use std::collections::{BTreeSet, HashMap};

/// Roll up cluster assignments into per-cluster course insights.
///
/// `insights_by_lecture` carries precomputed concept insights keyed by
/// lecture id. Struggling concepts are those scoring above
/// `struggle_threshold` in any lecture the cluster's students have
/// activity in, deduplicated keeping the highest score and ordered by
/// descending score. Clusters with no students are omitted; output is
/// ordered by descending student count, then cluster name.
pub fn rollup(
    assignments: &[ClusterAssignment],
    insights_by_lecture: &HashMap<String, Vec<ConceptInsight>>,
    struggle_threshold: f64,
    cancel: &CancelToken,
) -> Result<Vec<ClusterInsight>> {
    let mut by_cluster: HashMap<BehavioralCluster, Vec<&ClusterAssignment>> = HashMap::new();
    for assignment in assignments {
        by_cluster
            .entry(assignment.cluster)
            .or_default()
            .push(assignment);
    }

    let mut insights = Vec::with_capacity(by_cluster.len());
    for (cluster, members) in by_cluster {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // Deterministic lecture order regardless of assignment order
        let lecture_ids: BTreeSet<&str> = members
            .iter()
            .flat_map(|m| m.lecture_ids.iter().map(String::as_str))
            .collect();

        let mut best_scores: HashMap<&str, f64> = HashMap::new();
        let mut seen_order: Vec<&str> = Vec::new();
        for lecture_id in lecture_ids {
            let Some(lecture_insights) = insights_by_lecture.get(lecture_id) else {
                continue;
            };
            for insight in lecture_insights {
                if insight.struggle_score <= struggle_threshold {
                    continue;
                }
                match best_scores.get_mut(insight.concept_id.as_str()) {
                    Some(best) => *best = best.max(insight.struggle_score),
                    None => {
                        best_scores.insert(&insight.concept_id, insight.struggle_score);
                        seen_order.push(&insight.concept_id);
                    }
                }
            }
        }

        let mut struggling: Vec<&str> = seen_order;
        struggling.sort_by(|a, b| {
            best_scores[b]
                .partial_cmp(&best_scores[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let avg_engagement =
            members.iter().map(|m| m.engagement).sum::<f64>() / members.len() as f64;

        insights.push(ClusterInsight {
            cluster,
            student_count: members.len() as u64,
            struggling_concepts: struggling.into_iter().map(String::from).collect(),
            avg_engagement,
        });
    }

    insights.sort_by(|a, b| {
        b.student_count
            .cmp(&a.student_count)
            .then_with(|| a.cluster.as_str().cmp(b.cluster.as_str()))
    });
    Ok(insights)
}
