//! Shared fixtures for the scenario tests.

use sluice_core::{Multi, Scheduler, Single};

pub const BASKET_1: [&str; 6] = ["kiwi", "orange", "lemon", "orange", "lemon", "kiwi"];
pub const BASKET_2: [&str; 4] = ["banana", "lemon", "lemon", "kiwi"];
pub const BASKET_3: [&str; 5] = ["strawberry", "orange", "lemon", "grape", "strawberry"];

pub fn baskets() -> Vec<Vec<String>> {
    [&BASKET_1[..], &BASKET_2[..], &BASKET_3[..]].iter().map(|basket| basket.iter().map(|fruit| fruit.to_string()).collect()).collect()
}

/// Summary of one basket: its fruits without repeats and how many of each, both in order of
/// first appearance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FruitInfo {
    pub distinct: Vec<String>,
    pub counts: Vec<(String, u64)>,
}

impl FruitInfo {
    pub fn new(distinct: &[&str], counts: &[(&str, u64)]) -> Self {
        Self { distinct: distinct.iter().map(|f| f.to_string()).collect(), counts: counts.iter().map(|(f, n)| (f.to_string(), *n)).collect() }
    }
}

/// The summaries `baskets()` should produce, in basket order
pub fn expected_fruit_infos() -> Vec<FruitInfo> {
    vec![
        FruitInfo::new(&["kiwi", "orange", "lemon"], &[("kiwi", 2), ("orange", 2), ("lemon", 2)]),
        FruitInfo::new(&["banana", "lemon", "kiwi"], &[("banana", 1), ("lemon", 2), ("kiwi", 1)]),
        FruitInfo::new(&["strawberry", "orange", "lemon", "grape"], &[("strawberry", 2), ("orange", 1), ("lemon", 1), ("grape", 1)]),
    ]
}

#[derive(Debug, thiserror::Error)]
#[error("/ by zero")]
pub struct DivideByZero;

pub fn checked_div(dividend: i64, divisor: i64) -> Result<i64, DivideByZero> {
    if divisor == 0 {
        Err(DivideByZero)
    } else {
        Ok(dividend / divisor)
    }
}

/// How each basket's fruit stream is consumed by the two halves of the summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sharing {
    /// Each half subscribes to its own copy of the basket
    Cold,
    /// Each half subscribes on the shared parallel pool
    Parallel,
    /// Both halves share one published subscription that connects once both are attached
    Hot,
}

/// Summarises one basket: distinct fruits zipped with per-fruit counts
pub fn summarize(basket: Vec<String>, sharing: Sharing) -> Multi<FruitInfo> {
    let fruits = match sharing {
        Sharing::Hot => Multi::from_iter(basket).log("basket").publish().auto_connect(2),
        _ => Multi::from_iter(basket),
    };
    let mut distinct: Single<Vec<String>> = fruits.distinct().collect_list();
    let mut counts: Single<Vec<(String, u64)>> = fruits
        .group_by(|fruit| fruit.clone())
        .concat_map(|group| {
            let fruit = group.key().clone();
            group.count().map(move |count| vec![(fruit.clone(), count)])
        })
        .reduce(|mut all, current| {
            all.extend(current);
            all
        });
    if sharing == Sharing::Parallel {
        distinct = distinct.subscribe_on(Scheduler::parallel());
        counts = counts.subscribe_on(Scheduler::parallel());
    }
    distinct.zip_with(&counts).map(|(distinct, counts)| FruitInfo { distinct, counts }).to_multi()
}

pub fn basket_pipeline(sharing: Sharing) -> Multi<FruitInfo> { Multi::from_iter(baskets()).concat_map(move |basket| summarize(basket, sharing)) }
