//! Merging per-chunk transcription results into one transcript.
//!
//! Chunk-local times shift by the chunk offset, local speaker labels map
//! through the unifier's table, overlap duplicates collapse to the more
//! confident copy, and the result sorts deterministically by
//! `(start_sec, global_speaker_id, end_sec)`.

use std::collections::HashMap;

use tracing::debug;

use crate::dispatch::SegmentTranscript;
use crate::types::{MergedTranscript, QualityStats, SpeakerStats, TranscribedSegment};

const LOW_CONFIDENCE_THRESHOLD: f32 = 0.7;

/// Transcribed segments of one chunk, positioned by the chunk's offset in
/// the source recording.
#[derive(Debug, Clone)]
pub struct ChunkTranscript {
    pub offset_sec: f64,
    pub segments: Vec<SegmentTranscript>,
}

impl ChunkTranscript {
    /// A direct (unchunked) result is a single chunk at offset zero.
    pub fn direct(segments: Vec<SegmentTranscript>) -> Self {
        Self {
            offset_sec: 0.0,
            segments,
        }
    }
}

/// Merge chunk results into the final transcript.
pub fn merge_chunks(
    chunks: Vec<ChunkTranscript>,
    speaker_map: &HashMap<String, String>,
    overlap_dedupe_threshold: f64,
    processing_method: &str,
) -> MergedTranscript {
    // 1+2: shift times by chunk offset and map local labels to global ids;
    // unknown labels pass through unchanged.
    let mut candidates: Vec<TranscribedSegment> = Vec::new();
    for chunk in chunks {
        for seg in chunk.segments {
            let global_id = speaker_map
                .get(&seg.local_speaker_label)
                .cloned()
                .unwrap_or_else(|| seg.local_speaker_label.clone());
            let mut word_timestamps = seg.word_timestamps;
            for w in &mut word_timestamps {
                w.start += chunk.offset_sec;
                w.end += chunk.offset_sec;
            }
            candidates.push(TranscribedSegment {
                start_sec: seg.start_sec + chunk.offset_sec,
                end_sec: seg.end_sec + chunk.offset_sec,
                text: seg.text,
                confidence: seg.confidence,
                global_speaker_id: global_id,
                provider: seg.provider,
                word_timestamps,
                error: seg.error,
            });
        }
    }

    // 3: stable time-order iteration; an accepted segment overlapping a
    // candidate beyond the threshold keeps whichever is more confident
    // (ties keep the earlier arrival).
    candidates.sort_by(|a, b| {
        a.start_sec
            .partial_cmp(&b.start_sec)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut accepted: Vec<TranscribedSegment> = Vec::new();
    let mut dropped = 0usize;
    for candidate in candidates {
        let duplicate_of = accepted
            .iter()
            .position(|existing| overlap_ratio(existing, &candidate) >= overlap_dedupe_threshold);
        match duplicate_of {
            Some(i) => {
                if candidate.confidence > accepted[i].confidence {
                    accepted[i] = candidate;
                }
                dropped += 1;
            }
            None => accepted.push(candidate),
        }
    }
    if dropped > 0 {
        debug!(dropped, "removed duplicate overlap segments");
    }

    // 4: deterministic final ordering.
    accepted.sort_by(|a, b| {
        a.start_sec
            .partial_cmp(&b.start_sec)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.global_speaker_id.cmp(&b.global_speaker_id))
            .then_with(|| {
                a.end_sec
                    .partial_cmp(&b.end_sec)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });

    // 5: statistics.
    let speaker_statistics = speaker_statistics(&accepted);
    let quality_statistics = quality_statistics(&accepted);

    MergedTranscript {
        total_segments: accepted.len(),
        segments: accepted,
        speaker_statistics,
        quality_statistics,
        processing_method: processing_method.to_string(),
    }
}

/// Overlap length relative to the shorter of the two segments.
fn overlap_ratio(a: &TranscribedSegment, b: &TranscribedSegment) -> f64 {
    let a_dur = a.end_sec - a.start_sec;
    let b_dur = b.end_sec - b.start_sec;
    if a_dur <= 0.0 || b_dur <= 0.0 {
        return 0.0;
    }
    let overlap = (a.end_sec.min(b.end_sec) - a.start_sec.max(b.start_sec)).max(0.0);
    overlap / a_dur.min(b_dur)
}

fn speaker_statistics(segments: &[TranscribedSegment]) -> HashMap<String, SpeakerStats> {
    let mut stats: HashMap<String, (f64, usize, f64)> = HashMap::new();
    for seg in segments {
        let entry = stats.entry(seg.global_speaker_id.clone()).or_default();
        entry.0 += seg.end_sec - seg.start_sec;
        entry.1 += 1;
        entry.2 += seg.confidence as f64;
    }
    stats
        .into_iter()
        .map(|(id, (duration, count, confidence_sum))| {
            (
                id,
                SpeakerStats {
                    total_duration: duration,
                    segment_count: count,
                    avg_confidence: (confidence_sum / count as f64) as f32,
                },
            )
        })
        .collect()
}

fn quality_statistics(segments: &[TranscribedSegment]) -> QualityStats {
    if segments.is_empty() {
        return QualityStats::default();
    }
    let confidences: Vec<f32> = segments.iter().map(|s| s.confidence).collect();
    QualityStats {
        avg_confidence: confidences.iter().sum::<f32>() / confidences.len() as f32,
        min_confidence: confidences.iter().cloned().fold(f32::INFINITY, f32::min),
        max_confidence: confidences.iter().cloned().fold(f32::NEG_INFINITY, f32::max),
        total_segments: segments.len(),
        low_confidence_segments: confidences
            .iter()
            .filter(|&&c| c < LOW_CONFIDENCE_THRESHOLD)
            .count(),
    }
}
