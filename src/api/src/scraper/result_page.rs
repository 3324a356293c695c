//! Result page parser for race.netkeiba.com
//!
//! Parses the official result page into finishers and payouts.
//! URL: https://race.netkeiba.com/race/result.html?race_id=RACEID

use anyhow::{anyhow, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::ingest::{Finisher, ScrapedResult};
use crate::models::Payout;

const ROW_SELECTORS: &str =
    "table.RaceTable01 tbody tr, table.Shutuba_Table tbody tr, #All_Result_Table tbody tr";
const PAYOUT_ROW_SELECTORS: &str =
    ".Payout_Detail_Table tr, .Result_Pay_Back table tr, table.Pay_Table_01 tr";

/// Payout table headings and the bet type each maps to
const BET_TYPES: [(&str, &str); 10] = [
    ("単勝", "win"),
    ("複勝", "place"),
    ("枠連", "bracket_quinella"),
    ("馬連", "quinella"),
    ("ワイド", "wide"),
    ("馬単", "exacta"),
    ("三連複", "trio"),
    ("三連単", "trifecta"),
    ("3連複", "trio"),
    ("3連単", "trifecta"),
];

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Invalid selector {}: {:?}", css, e))
}

fn cell_text(cell: &ElementRef) -> String {
    cell.text().collect::<String>().trim().to_string()
}

/// Parser for result pages
pub struct ResultPageParser {
    rows: Selector,
    payout_rows: Selector,
    td: Selector,
    th: Selector,
    popularity: Selector,
    odds: Selector,
    odds_fallback: Selector,
    line_break: Regex,
    tag: Regex,
    popularity_text: Regex,
}

impl ResultPageParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            rows: selector(ROW_SELECTORS)?,
            payout_rows: selector(PAYOUT_ROW_SELECTORS)?,
            td: selector("td")?,
            th: selector("th")?,
            popularity: selector("td.Ninki span")?,
            odds: selector("span.Odds_Ninki")?,
            odds_fallback: selector("td.Odds span")?,
            line_break: Regex::new(r"<br\s*/?>")?,
            tag: Regex::new(r"<[^>]*>")?,
            popularity_text: Regex::new(r"(\d+)人気")?,
        })
    }

    /// Parse result HTML. An unpublished page yields no finishers.
    pub fn parse(&self, html: &str) -> ScrapedResult {
        let document = Html::parse_document(html);

        let mut finishers: Vec<Finisher> = document
            .select(&self.rows)
            .filter_map(|row| self.parse_finisher(&row))
            .collect();
        finishers.sort_by_key(|f| f.position);

        let payouts = document
            .select(&self.payout_rows)
            .flat_map(|row| self.parse_payout_row(&row))
            .collect();

        ScrapedResult { finishers, payouts }
    }

    fn parse_finisher(&self, row: &ElementRef) -> Option<Finisher> {
        let cells: Vec<_> = row.select(&self.td).collect();
        if cells.len() < 4 {
            return None;
        }

        // Scratched, excluded and non-finishing runners have no numeric position
        let position: u32 = cell_text(&cells[0]).parse().ok().filter(|p| *p >= 1)?;
        let post_number: u32 = cell_text(&cells[2]).parse().ok().filter(|p| *p >= 1)?;

        let finish_time = cells
            .get(7)
            .map(cell_text)
            .filter(|t| !t.is_empty());

        let popularity = row
            .select(&self.popularity)
            .next()
            .map(|e| cell_text(&e))
            .and_then(|text| {
                self.popularity_text
                    .captures(&text)
                    .and_then(|caps| caps[1].parse().ok())
                    .or_else(|| text.parse().ok())
            });

        let odds = row
            .select(&self.odds)
            .next()
            .or_else(|| row.select(&self.odds_fallback).next())
            .and_then(|e| cell_text(&e).parse::<f64>().ok());

        Some(Finisher {
            post_number,
            position,
            finish_time,
            popularity,
            odds,
        })
    }

    fn parse_payout_row(&self, row: &ElementRef) -> Vec<Payout> {
        let Some(heading) = row.select(&self.th).next().map(|th| cell_text(&th)) else {
            return Vec::new();
        };
        let Some(bet_type) = BET_TYPES
            .iter()
            .find(|(label, _)| heading.contains(label))
            .map(|(_, bet_type)| *bet_type)
        else {
            return Vec::new();
        };

        let cells: Vec<_> = row.select(&self.td).collect();
        if cells.len() < 2 {
            return Vec::new();
        }

        let combinations = self.split_lines(&cells[0]);
        let amounts = self.split_lines(&cells[1]);
        let popularities = cells
            .get(2)
            .map(|c| self.split_lines(c))
            .unwrap_or_default();

        combinations
            .iter()
            .enumerate()
            .filter_map(|(i, combination)| {
                let amount: i64 = amounts
                    .get(i)?
                    .chars()
                    .filter(|c| c.is_ascii_digit())
                    .collect::<String>()
                    .parse()
                    .ok()
                    .filter(|a| *a > 0)?;
                if combination.is_empty() {
                    return None;
                }
                Some(Payout {
                    bet_type: bet_type.to_string(),
                    combination: combination.clone(),
                    payout_amount: amount,
                    popularity: popularities.get(i).and_then(|p| {
                        p.chars()
                            .filter(|c| c.is_ascii_digit())
                            .collect::<String>()
                            .parse()
                            .ok()
                    }),
                })
            })
            .collect()
    }

    /// Cell contents split on `<br>`, tags stripped, whitespace collapsed
    fn split_lines(&self, cell: &ElementRef) -> Vec<String> {
        let html = cell.inner_html();
        self.line_break
            .split(&html)
            .map(|part| {
                let text = self.tag.replace_all(part, " ");
                text.split_whitespace().collect::<Vec<_>>().join(" ")
            })
            .collect()
    }
}
