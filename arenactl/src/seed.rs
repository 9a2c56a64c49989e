//! Lookup-table population over PostgREST.
//!
//! `rank_system` and `handicap_rules` are small tables the app reads at startup. Both seeders
//! keep going when a single row fails, count what went through, and leave it to the caller to
//! turn a partial run into a non-zero exit through [`SeedReport::into_result`].

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::db::models::handicap::HandicapRuleRow;
use crate::db::models::ranks::{RankBandUpdate, RankSystemRow};
use crate::errors::{Error, Result};
use crate::ranking::handicap::{HandicapScheme, HandicapTable, HandicapVerification};
use crate::ranking::ranks::{RETIRED_RANK_CODES, STANDARD_BANDS};
use crate::rest::{Filter, RestClient};

pub const RANK_TABLE: &str = "rank_system";
pub const HANDICAP_TABLE: &str = "handicap_rules";

/// Outcome of a seeding run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub operation: String,
    pub attempted: usize,
    pub succeeded: usize,
    /// Rows deleted before writing
    pub removed: usize,
    pub failures: Vec<String>,
}

impl SeedReport {
    fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            ..Default::default()
        }
    }

    fn record(&mut self, item: &str, outcome: Result<()>) {
        self.attempted += 1;
        match outcome {
            Ok(()) => {
                self.succeeded += 1;
                info!(item, progress = %format!("{}/{}", self.succeeded, self.attempted), "Seeded");
            }
            Err(e) => {
                warn!(item, error = %e, "Seed item failed");
                self.failures.push(format!("{item}: {e}"));
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// `Err(Error::Incomplete)` if any item failed
    pub fn into_result(self) -> Result<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(Error::Incomplete {
                operation: self.operation,
                attempted: self.attempted,
                succeeded: self.succeeded,
            })
        }
    }
}

/// Live `rank_system` rows, weakest first
pub async fn fetch_ranks(client: &RestClient) -> Result<Vec<RankSystemRow>> {
    client
        .select(
            RANK_TABLE,
            "rank_code,rank_order,elo_min,elo_max,display_name",
            &[],
            Some("elo_min.asc"),
        )
        .await
}

pub async fn fetch_handicap_rules(client: &RestClient) -> Result<Vec<HandicapRuleRow>> {
    client
        .select(
            HANDICAP_TABLE,
            "rank_difference_type,rank_difference_value,bet_amount,handicap_value",
            &[],
            Some("rank_difference_value.asc,bet_amount.asc"),
        )
        .await
}

/// Remove the retired ranks and write the standard band of every remaining rank
#[instrument(skip(client), err)]
pub async fn sync_ranks(client: &RestClient) -> Result<SeedReport> {
    let mut report = SeedReport::new("ranks sync");

    let retired = client
        .delete(RANK_TABLE, &[Filter::in_list("rank_code", RETIRED_RANK_CODES)])
        .await
        .map(|rows| {
            report.removed = rows.len();
            info!(removed = rows.len(), "Removed retired ranks");
        });
    report.record("remove retired ranks", retired);

    for band in STANDARD_BANDS {
        let code = band.code;
        let body = RankBandUpdate {
            rank_order: i32::from(code.order()),
            elo_min: band.elo_min,
            elo_max: band.elo_max,
        };
        let outcome = client
            .update(RANK_TABLE, &[Filter::eq("rank_code", code)], &body)
            .await
            .and_then(|rows| {
                if rows.is_empty() {
                    Err(Error::NotFound {
                        resource: "Rank".to_string(),
                        id: code.to_string(),
                    })
                } else {
                    Ok(())
                }
            });
        report.record(&format!("{code} {band}"), outcome);
    }

    Ok(report)
}

/// Replace every handicap rule with the scheme's rules, then read the table back and verify it.
///
/// Failing to clear the table aborts the run, since inserting on top of old rules would leave
/// duplicates.
#[instrument(skip(client), err)]
pub async fn populate_handicap(client: &RestClient, scheme: HandicapScheme) -> Result<(SeedReport, HandicapVerification)> {
    let mut report = SeedReport::new("handicap populate");
    let table = HandicapTable::new(scheme);

    let removed = client.delete(HANDICAP_TABLE, &[Filter::not_null("id")]).await?;
    report.removed = removed.len();
    info!(removed = removed.len(), %scheme, "Cleared handicap rules");

    for rule in table.rules() {
        let item = match rule.bet_amount {
            Some(bet) => format!(
                "{} / {} {} = {}",
                rule.rank_difference_type,
                bet,
                scheme.bet_unit(),
                rule.handicap_value
            ),
            None => format!("{} = {}", rule.rank_difference_type, rule.handicap_value),
        };
        let outcome = client
            .insert::<_, serde_json::Value>(HANDICAP_TABLE, rule)
            .await
            .map(|_| ());
        report.record(&item, outcome);
    }

    let live = fetch_handicap_rules(client).await?;
    let verification = table.verify(&live);
    if verification.is_clean() {
        info!(rules = verification.actual_count, "Handicap table verified");
    } else {
        for problem in verification.problems() {
            warn!(problem, "Handicap table mismatch");
        }
    }

    Ok((report, verification))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::tests::client_for;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_report_into_result() {
        let mut report = SeedReport::new("ranks sync");
        report.record("K", Ok(()));
        assert!(report.clone().into_result().is_ok());

        report.record(
            "I",
            Err(Error::NotFound {
                resource: "Rank".to_string(),
                id: "I".to_string(),
            }),
        );
        assert_eq!(report.failures, vec!["I: Rank I not found".to_string()]);
        match report.into_result() {
            Err(Error::Incomplete {
                attempted, succeeded, ..
            }) => {
                assert_eq!(attempted, 2);
                assert_eq!(succeeded, 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_sync_ranks() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/rest/v1/rank_system"))
            .and(query_param("rank_code", "in.(K+,I+)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"rank_code": "K+"}, {"rank_code": "I+"}])))
            .expect(1)
            .mount(&server)
            .await;
        // D is missing from the live table
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/rank_system"))
            .and(query_param("rank_code", "eq.D"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/rank_system"))
            .and(query_param("rank_code", "eq.C"))
            .and(body_partial_json(json!({"rank_order": 10, "elo_min": 1900, "elo_max": null})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"rank_code": "C"}])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/rank_system"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"rank_code": "?"}])))
            .mount(&server)
            .await;

        let report = sync_ranks(&client_for(&server)).await.unwrap();
        assert_eq!(report.removed, 2);
        assert_eq!(report.attempted, 11);
        assert_eq!(report.succeeded, 10);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].starts_with("D 1800-1899"));
        assert!(report.into_result().is_err());
    }

    #[test_log::test(tokio::test)]
    async fn test_populate_handicap_and_verify() {
        let server = MockServer::start().await;
        let scheme = HandicapScheme::Challenge;

        Mock::given(method("DELETE"))
            .and(path("/rest/v1/handicap_rules"))
            .and(query_param("id", "not.is.null"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/handicap_rules"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{}])))
            .expect(24)
            .mount(&server)
            .await;
        let live: Vec<serde_json::Value> = scheme
            .rules()
            .iter()
            .map(|r| serde_json::to_value(r).unwrap())
            .collect();
        Mock::given(method("GET"))
            .and(path("/rest/v1/handicap_rules"))
            .respond_with(ResponseTemplate::new(200).set_body_json(live))
            .expect(1)
            .mount(&server)
            .await;

        let (report, verification) = populate_handicap(&client_for(&server), scheme).await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.attempted, 24);
        assert_eq!(report.succeeded, 24);
        assert!(verification.is_clean());
    }

    #[test_log::test(tokio::test)]
    async fn test_populate_stops_when_clear_fails() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/rest/v1/handicap_rules"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Invalid API key"))
            .mount(&server)
            .await;

        let err = populate_handicap(&client_for(&server), HandicapScheme::Basic)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rest { status: 401, .. }));
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_inserts_are_counted() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"rank_difference_type": "9_rank"})))
            .respond_with(ResponseTemplate::new(400).set_body_string("violates check constraint"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{}])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let (report, verification) = populate_handicap(&client_for(&server), HandicapScheme::Basic)
            .await
            .unwrap();
        assert_eq!(report.attempted, 9);
        assert_eq!(report.succeeded, 8);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(verification.missing.len(), 9);
    }
}
