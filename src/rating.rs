use std::collections::BTreeMap;

use crate::models::EventRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct RatingSummary {
    pub count: usize,
    pub average: f64,
    /// Reviews per star, 1 through 5. Every star is present.
    pub distribution: BTreeMap<u8, usize>,
}

pub fn summarize_ratings<'a, I>(reviews: I) -> RatingSummary
where
    I: IntoIterator<Item = &'a EventRecord>,
{
    let mut distribution: BTreeMap<u8, usize> = (1..=5).map(|star| (star, 0)).collect();
    let mut count = 0usize;
    let mut total = 0.0;

    for rating in reviews.into_iter().filter_map(|review| review.rating) {
        count += 1;
        total += rating;
        *distribution.entry(star_for(rating)).or_insert(0) += 1;
    }

    let average = if count == 0 {
        0.0
    } else {
        round_to_cents(total / count as f64)
    };

    RatingSummary {
        count,
        average,
        distribution,
    }
}

fn star_for(rating: f64) -> u8 {
    rating.round().clamp(1.0, 5.0) as u8
}

fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
