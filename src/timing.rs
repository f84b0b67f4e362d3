//! Scene timing allocation
//!
//! Splits a fixed narration length across scenes proportionally to how much
//! text each scene carries, while keeping every scene on screen for at least
//! a minimum duration. The result always sums to the requested total.
//!
//! When the minimum cannot be honored (`scenes * min_ms > total_ms`) the floor
//! is dropped and the total is split evenly, the last scene absorbing the
//! division remainder.

use crate::scene::Scene;

/// Allocate `total_ms` across scenes weighted by `text_lengths`.
///
/// `text_lengths[i]` is the non-whitespace character count of scene `i`; a
/// length of zero is treated as one so no scene is starved by the
/// proportional split.
#[must_use]
pub fn allocate(text_lengths: &[usize], total_ms: u64, min_ms: u64) -> Vec<u64> {
    let count = text_lengths.len();
    match count {
        0 => return Vec::new(),
        1 => return vec![total_ms],
        _ => {}
    }

    if count as u128 * u128::from(min_ms) > u128::from(total_ms) {
        return even_split(count, total_ms);
    }

    let mut durations = proportional(text_lengths, total_ms);

    let mut deficit = 0u64;
    for duration in &mut durations {
        if *duration < min_ms {
            deficit += min_ms - *duration;
            *duration = min_ms;
        }
    }

    if deficit > 0 {
        deficit = recover_deficit(&mut durations, deficit, min_ms);
    }

    // Rounding residue only; may push the last scene under the floor.
    if deficit > 0 {
        let last = last_mut(&mut durations);
        *last = last.saturating_sub(deficit);
    }

    settle_on_last(&mut durations, total_ms);
    durations
}

/// Allocate using each scene's own text weight
#[must_use]
pub fn allocate_for_scenes(scenes: &[Scene], total_ms: u64, min_ms: u64) -> Vec<u64> {
    let lengths: Vec<usize> = scenes.iter().map(Scene::weight).collect();
    allocate(&lengths, total_ms, min_ms)
}

/// First pass: floor-divided proportional shares, residue on the last scene
fn proportional(text_lengths: &[usize], total_ms: u64) -> Vec<u64> {
    let weights: Vec<u128> = text_lengths.iter().map(|&l| l.max(1) as u128).collect();
    let weight_sum: u128 = weights.iter().sum();
    let total = u128::from(total_ms);

    let mut durations: Vec<u64> = weights
        .iter()
        .map(|w| (total * w / weight_sum) as u64)
        .collect();

    settle_on_last(&mut durations, total_ms);
    durations
}

/// Take `deficit` back from scenes above the floor, proportionally to their
/// surplus. Returns whatever could not be recovered.
fn recover_deficit(durations: &mut [u64], deficit: u64, min_ms: u64) -> u64 {
    let surplus_total: u64 = durations.iter().map(|d| d.saturating_sub(min_ms)).sum();
    if surplus_total == 0 {
        return deficit;
    }

    let mut remaining = deficit;
    for duration in durations.iter_mut() {
        if remaining == 0 {
            break;
        }
        let surplus = duration.saturating_sub(min_ms);
        if surplus == 0 {
            continue;
        }
        let share = (u128::from(deficit) * u128::from(surplus)).div_ceil(u128::from(surplus_total));
        let take = (share as u64).min(surplus).min(remaining);
        *duration -= take;
        remaining -= take;
    }
    remaining
}

fn even_split(count: usize, total_ms: u64) -> Vec<u64> {
    let share = total_ms / count as u64;
    let mut durations = vec![share; count];
    settle_on_last(&mut durations, total_ms);
    durations
}

/// Push any difference between the sum and `total_ms` onto the last scene
fn settle_on_last(durations: &mut [u64], total_ms: u64) {
    let sum: u64 = durations.iter().sum();
    let last = last_mut(durations);
    if sum < total_ms {
        *last += total_ms - sum;
    } else {
        *last = last.saturating_sub(sum - total_ms);
    }
}

fn last_mut(durations: &mut [u64]) -> &mut u64 {
    let idx = durations.len() - 1;
    &mut durations[idx]
}
