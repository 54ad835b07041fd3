//! Cross-chunk speaker unification.
//!
//! Local labels from independent diarization calls are clustered into
//! global identities by agglomerative clustering over segment embeddings
//! (cosine distance, average linkage), then optionally matched against the
//! user's voice fingerprint.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::diarization::embedding::{cosine_distance, cosine_similarity, mean_embedding};
use crate::types::{GlobalSpeaker, SELF_SPEAKER_NAME, SpeakerSegment};

/// Outcome of unification: the global-speaker set and the
/// `local_label -> global_id` map.
#[derive(Debug, Clone)]
pub struct UnificationResult {
    pub global_speakers: Vec<GlobalSpeaker>,
    pub speaker_map: HashMap<String, String>,
}

/// Cluster segments (possibly from several chunks) into global speakers.
///
/// Target cluster count is `min(max_speakers, n_segments_with_embeddings)`.
/// If a fingerprint is present, the single best cluster whose representative
/// reaches `user_match_threshold` cosine similarity is named `"self"`; ties
/// go to the lowest cluster id. Remaining clusters get stable numbered
/// labels by ascending cluster id.
pub fn unify_speakers(
    segments: &[SpeakerSegment],
    fingerprint: Option<&[f32]>,
    max_speakers: usize,
    user_match_threshold: f32,
) -> UnificationResult {
    let embedded: Vec<(usize, &SpeakerSegment)> = segments
        .iter()
        .enumerate()
        .filter(|(_, s)| s.embedding.as_ref().is_some_and(|e| !e.is_empty()))
        .collect();

    if embedded.len() < 2 {
        return default_speaker(segments, fingerprint, user_match_threshold);
    }

    // Mixed embedding dimensions mean the inputs cannot be compared;
    // fall back to identity mapping rather than clustering garbage.
    let dim = embedded[0].1.embedding.as_ref().unwrap().len();
    if embedded
        .iter()
        .any(|(_, s)| s.embedding.as_ref().unwrap().len() != dim)
    {
        warn!("inconsistent embedding dimensions; falling back to identity mapping");
        return identity_mapping(segments);
    }

    let k = max_speakers.min(embedded.len()).max(1);
    let clusters = agglomerate(&embedded, k);
    debug!(
        segments = embedded.len(),
        clusters = clusters.len(),
        "agglomerative clustering complete"
    );

    build_result(segments, &embedded, clusters, fingerprint, user_match_threshold)
}

/// Two clusters closer than this average cosine distance are the same
/// voice and keep merging even below the `k` target.
const SAME_SPEAKER_DISTANCE: f32 = 0.15;

/// Bottom-up merging with average linkage.
///
/// Merges until `k` clusters remain, then continues while the closest
/// pair is within [`SAME_SPEAKER_DISTANCE`], so a recording with fewer
/// real voices than `max_speakers` collapses to its true speaker count.
/// Each cluster is a list of indices into `embedded`.
fn agglomerate(embedded: &[(usize, &SpeakerSegment)], k: usize) -> Vec<Vec<usize>> {
    let n = embedded.len();
    let embeddings: Vec<&[f32]> = embedded
        .iter()
        .map(|(_, s)| s.embedding.as_ref().unwrap().as_slice())
        .collect();

    // Pairwise segment distances, computed once.
    let mut distance = vec![0.0f32; n * n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = cosine_distance(embeddings[i], embeddings[j]);
            distance[i * n + j] = d;
            distance[j * n + i] = d;
        }
    }

    let mut clusters: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();

    while clusters.len() > 1 {
        let mut best = (0usize, 1usize);
        let mut best_dist = f32::INFINITY;

        for i in 0..clusters.len() {
            for j in (i + 1)..clusters.len() {
                let dist = average_linkage(&clusters[i], &clusters[j], &distance, n);
                if dist < best_dist {
                    best_dist = dist;
                    best = (i, j);
                }
            }
        }

        if clusters.len() <= k && best_dist >= SAME_SPEAKER_DISTANCE {
            break;
        }

        let (i, j) = best;
        let merged = clusters.remove(j);
        clusters[i].extend(merged);
    }

    // Stable ordering: cluster id follows the earliest member segment.
    for cluster in &mut clusters {
        cluster.sort_unstable();
    }
    clusters.sort_by_key(|c| c[0]);
    clusters
}

fn average_linkage(a: &[usize], b: &[usize], distance: &[f32], n: usize) -> f32 {
    let mut total = 0.0f32;
    for &i in a {
        for &j in b {
            total += distance[i * n + j];
        }
    }
    total / (a.len() * b.len()) as f32
}

fn build_result(
    segments: &[SpeakerSegment],
    embedded: &[(usize, &SpeakerSegment)],
    clusters: Vec<Vec<usize>>,
    fingerprint: Option<&[f32]>,
    user_match_threshold: f32,
) -> UnificationResult {
    // Representative embedding and confidence per cluster.
    let mut reps: Vec<Vec<f32>> = Vec::with_capacity(clusters.len());
    let mut confidences: Vec<f32> = Vec::with_capacity(clusters.len());
    for members in &clusters {
        let vectors: Vec<&[f32]> = members
            .iter()
            .map(|&m| embedded[m].1.embedding.as_ref().unwrap().as_slice())
            .collect();
        reps.push(mean_embedding(&vectors));
        let avg = members
            .iter()
            .map(|&m| embedded[m].1.confidence)
            .sum::<f32>()
            / members.len() as f32;
        confidences.push(avg);
    }

    // The single best cluster at or above the threshold becomes "self";
    // on an exact similarity tie the lowest cluster id wins.
    let self_cluster = fingerprint.and_then(|fp| {
        reps.iter()
            .enumerate()
            .map(|(id, rep)| (id, cosine_similarity(rep, fp)))
            .filter(|(_, sim)| *sim >= user_match_threshold)
            .max_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(b.0.cmp(&a.0))
            })
            .map(|(id, _)| id)
    });

    let mut global_speakers = Vec::with_capacity(clusters.len());
    for (cluster_id, members) in clusters.iter().enumerate() {
        let display_name = if Some(cluster_id) == self_cluster {
            SELF_SPEAKER_NAME.to_string()
        } else {
            format!("speaker_{}", cluster_id + 1)
        };
        global_speakers.push(GlobalSpeaker {
            global_id: format!("SPEAKER_{cluster_id:02}"),
            display_name,
            representative_embedding: reps[cluster_id].clone(),
            confidence: confidences[cluster_id],
            segment_count: members.len(),
        });
    }

    // Each local label maps to the cluster holding most of its segments.
    let mut votes: HashMap<&str, HashMap<usize, usize>> = HashMap::new();
    for (cluster_id, members) in clusters.iter().enumerate() {
        for &m in members {
            let label = embedded[m].1.local_speaker_label.as_str();
            *votes.entry(label).or_default().entry(cluster_id).or_default() += 1;
        }
    }

    let mut speaker_map = HashMap::new();
    for segment in segments {
        let label = segment.local_speaker_label.as_str();
        if speaker_map.contains_key(label) {
            continue;
        }
        if let Some(by_cluster) = votes.get(label) {
            // Highest vote count; ties resolved toward the lower cluster id.
            let winner = by_cluster
                .iter()
                .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
                .map(|(&id, _)| id)
                .unwrap_or(0);
            speaker_map.insert(
                label.to_string(),
                global_speakers[winner].global_id.clone(),
            );
        }
        // Labels with no embedded segments pass through unmapped; the
        // merger leaves them unchanged.
    }

    UnificationResult {
        global_speakers,
        speaker_map,
    }
}

/// Degraded path for fewer than two embeddings: one default global speaker
/// covering every local label.
fn default_speaker(
    segments: &[SpeakerSegment],
    fingerprint: Option<&[f32]>,
    user_match_threshold: f32,
) -> UnificationResult {
    let embedding = segments
        .iter()
        .find_map(|s| s.embedding.clone())
        .unwrap_or_default();

    let display_name = match fingerprint {
        Some(fp) if cosine_similarity(&embedding, fp) >= user_match_threshold => {
            SELF_SPEAKER_NAME.to_string()
        }
        _ => "speaker_1".to_string(),
    };

    let confidence = if segments.is_empty() {
        0.0
    } else {
        segments.iter().map(|s| s.confidence).sum::<f32>() / segments.len() as f32
    };

    let global = GlobalSpeaker {
        global_id: "SPEAKER_00".to_string(),
        display_name,
        representative_embedding: embedding,
        confidence,
        segment_count: segments.len(),
    };

    let speaker_map = segments
        .iter()
        .map(|s| (s.local_speaker_label.clone(), global.global_id.clone()))
        .collect();

    UnificationResult {
        global_speakers: vec![global],
        speaker_map,
    }
}

/// Degraded path for uncomparable embeddings: one global speaker per local
/// label, no fingerprint matching.
fn identity_mapping(segments: &[SpeakerSegment]) -> UnificationResult {
    let mut labels: Vec<&str> = Vec::new();
    for s in segments {
        if !labels.contains(&s.local_speaker_label.as_str()) {
            labels.push(&s.local_speaker_label);
        }
    }

    let mut global_speakers = Vec::with_capacity(labels.len());
    let mut speaker_map = HashMap::new();
    for (id, label) in labels.iter().enumerate() {
        let members: Vec<&SpeakerSegment> = segments
            .iter()
            .filter(|s| s.local_speaker_label == *label)
            .collect();
        let confidence =
            members.iter().map(|s| s.confidence).sum::<f32>() / members.len() as f32;
        let global_id = format!("SPEAKER_{id:02}");
        speaker_map.insert(label.to_string(), global_id.clone());
        global_speakers.push(GlobalSpeaker {
            global_id,
            display_name: format!("speaker_{}", id + 1),
            representative_embedding: Vec::new(),
            confidence,
            segment_count: members.len(),
        });
    }

    UnificationResult {
        global_speakers,
        speaker_map,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(label: &str, start: f64, embedding: Vec<f32>) -> SpeakerSegment {
        SpeakerSegment {
            start_sec: start,
            end_sec: start + 2.0,
            local_speaker_label: label.to_string(),
            confidence: 0.9,
            embedding: Some(embedding),
        }
    }

    /// Unit vector leaning toward one of two axes with a small wobble.
    fn voice(axis: usize, wobble: f32) -> Vec<f32> {
        let mut v = vec![0.05f32; 8];
        v[axis] = 1.0;
        v[(axis + 4) % 8] += wobble;
        crate::diarization::embedding::normalize(&mut v);
        v
    }

    #[test]
    fn clusters_two_voices() {
        let segments = vec![
            seg("A0", 0.0, voice(0, 0.01)),
            seg("B0", 2.0, voice(1, 0.02)),
            seg("A1", 4.0, voice(0, 0.03)),
            seg("B1", 6.0, voice(1, 0.01)),
        ];
        let result = unify_speakers(&segments, None, 2, 0.8);
        assert_eq!(result.global_speakers.len(), 2);
        assert_eq!(result.speaker_map["A0"], result.speaker_map["A1"]);
        assert_eq!(result.speaker_map["B0"], result.speaker_map["B1"]);
        assert_ne!(result.speaker_map["A0"], result.speaker_map["B0"]);
    }

    #[test]
    fn fingerprint_names_exactly_one_self() {
        let fp = voice(0, 0.0);
        let segments = vec![
            seg("A0", 0.0, voice(0, 0.01)),
            seg("B0", 2.0, voice(1, 0.02)),
            seg("A1", 4.0, voice(0, 0.02)),
            seg("B1", 6.0, voice(1, 0.01)),
        ];
        let result = unify_speakers(&segments, Some(&fp), 2, 0.8);
        let selves: Vec<_> = result
            .global_speakers
            .iter()
            .filter(|g| g.is_self())
            .collect();
        assert_eq!(selves.len(), 1);
        assert_eq!(result.speaker_map["A0"], selves[0].global_id);
    }

    #[test]
    fn below_threshold_no_self() {
        let fp = voice(2, 0.0);
        let segments = vec![
            seg("A0", 0.0, voice(0, 0.01)),
            seg("B0", 2.0, voice(1, 0.02)),
        ];
        let result = unify_speakers(&segments, Some(&fp), 2, 0.8);
        assert!(result.global_speakers.iter().all(|g| !g.is_self()));
        // Numbered names are stable by cluster id.
        assert_eq!(result.global_speakers[0].display_name, "speaker_1");
        assert_eq!(result.global_speakers[1].display_name, "speaker_2");
    }

    #[test]
    fn single_embedding_default_speaker() {
        let segments = vec![seg("A0", 0.0, voice(0, 0.0))];
        let result = unify_speakers(&segments, None, 5, 0.8);
        assert_eq!(result.global_speakers.len(), 1);
        assert_eq!(result.speaker_map["A0"], "SPEAKER_00");
    }

    #[test]
    fn mismatched_dims_identity_mapping() {
        let segments = vec![
            seg("A0", 0.0, vec![1.0, 0.0]),
            seg("B0", 2.0, vec![0.0, 1.0, 0.0]),
        ];
        let result = unify_speakers(&segments, None, 2, 0.8);
        assert_eq!(result.global_speakers.len(), 2);
        assert_ne!(result.speaker_map["A0"], result.speaker_map["B0"]);
    }

    #[test]
    fn max_speakers_caps_clusters() {
        let segments: Vec<SpeakerSegment> = (0..6)
            .map(|i| seg(&format!("S{i}"), i as f64 * 2.0, voice(i % 4, 0.01 * i as f32)))
            .collect();
        let result = unify_speakers(&segments, None, 3, 0.8);
        assert_eq!(result.global_speakers.len(), 3);
    }
}
