// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Pass-through fetches of provider health data.
//!
//! No aggregation happens here; responses are trimmed to the fields the app
//! displays and returned as JSON.

use super::oauth::ProviderService;
use crate::error::AppError;
use chrono::{Duration, NaiveDate};
use serde_json::{json, Value};
use uuid::Uuid;

/// Number of intraday heart-rate samples returned.
const HEART_RATE_SAMPLES: usize = 10;

/// Days covered by the step and activity series.
const SERIES_DAYS: i64 = 7;

/// Fitbit activity minute series fetched for the summary.
const ACTIVITY_SERIES: [&str; 4] = [
    "steps",
    "minutesLightlyActive",
    "minutesFairlyActive",
    "minutesVeryActive",
];

/// Today's intraday heart rate: latest value plus the last few samples.
pub async fn fitbit_heart_rate(service: &ProviderService, user_id: Uuid) -> Result<Value, AppError> {
    let today = service.today();
    let path = format!("/1/user/-/activities/heart/date/{}/1d/1sec.json", today);
    let response = service.api_get(user_id, &path).await?;

    let dataset = response
        .pointer("/activities-heart-intraday/dataset")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let latest = dataset.last().and_then(|s| s.get("value")).cloned();
    let tail = dataset[dataset.len().saturating_sub(HEART_RATE_SAMPLES)..].to_vec();

    Ok(json!({
        "message": "Data fetched",
        "latestHeartRate": latest,
        "dataset": tail,
    }))
}

/// Step counts for the seven days ending today.
pub async fn fitbit_steps(service: &ProviderService, user_id: Uuid) -> Result<Value, AppError> {
    let path = format!(
        "/1/user/-/activities/steps/date/{}/{}d.json",
        service.today(),
        SERIES_DAYS
    );
    let response = service.api_get(user_id, &path).await?;

    Ok(json!({
        "message": "Steps fetched",
        "steps": response.get("activities-steps").cloned().unwrap_or(Value::Array(vec![])),
    }))
}

/// Steps and active-minute series plus per-day sleep for the last seven days,
/// all fetched concurrently.
///
/// A day whose sleep log cannot be fetched reports zero sleep; a failed
/// activity series fails the request.
pub async fn fitbit_activity_summary(
    service: &ProviderService,
    user_id: Uuid,
) -> Result<Value, AppError> {
    let (start, end) = series_range(service.today());

    // Refresh once up front so the concurrent fetches share one token.
    service.ensure_valid_access_token(user_id).await?;

    let series_fetches = ACTIVITY_SERIES.map(|metric| {
        let path = format!("/1/user/-/activities/{}/date/{}/{}.json", metric, start, end);
        async move { service.api_get(user_id, &path).await }
    });
    let sleep_fetches = start
        .iter_days()
        .take_while(|day| *day <= end)
        .map(|day| async move { sleep_day(service, user_id, day).await });

    let (responses, sleep) = tokio::join!(
        futures_util::future::try_join_all(series_fetches),
        futures_util::future::join_all(sleep_fetches)
    );
    let responses = responses?;

    let mut series = serde_json::Map::new();
    for (metric, response) in ACTIVITY_SERIES.iter().zip(responses) {
        let key = format!("activities-{}", metric);
        series.insert(
            metric.to_string(),
            response.get(&key).cloned().unwrap_or(Value::Array(vec![])),
        );
    }

    Ok(json!({
        "message": "Activity summary fetched",
        "startDate": start.to_string(),
        "endDate": end.to_string(),
        "series": series,
        "sleep": sleep,
    }))
}

/// Sleep summary for one night; an unavailable log counts as no sleep.
async fn sleep_day(service: &ProviderService, user_id: Uuid, day: NaiveDate) -> Value {
    let path = format!("/1.2/user/-/sleep/date/{}.json", day);
    let summary = match service.api_get(user_id, &path).await {
        Ok(response) => response.get("summary").cloned().unwrap_or(Value::Null),
        Err(e) => {
            tracing::warn!(user_id = %user_id, date = %day, error = %e, "Sleep log unavailable");
            Value::Null
        }
    };
    let minutes = |field: &str| summary.get(field).and_then(Value::as_i64).unwrap_or(0);

    json!({
        "date": day.to_string(),
        "totalMinutesAsleep": minutes("totalMinutesAsleep"),
        "totalTimeInBed": minutes("totalTimeInBed"),
    })
}

/// Omron measurements recorded in the last seven days.
pub async fn omron_measurements(
    service: &ProviderService,
    user_id: Uuid,
) -> Result<Value, AppError> {
    let since = service.today() - Duration::days(SERIES_DAYS);
    let body = json!({ "since": since.to_string() });
    let response = service.api_post(user_id, "/api/measurement", &body).await?;

    Ok(json!({
        "message": "Measurements fetched",
        "since": since.to_string(),
        "measurements": response,
    }))
}

/// Inclusive seven-day window ending at `today`.
fn series_range(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    (today - Duration::days(SERIES_DAYS - 1), today)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_range_is_seven_days_inclusive() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let (start, end) = series_range(today);
        assert_eq!(start, NaiveDate::from_ymd_opt(2026, 3, 4).unwrap());
        assert_eq!(end, today);
    }
}
