use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use cabflow_core::domain::booking::{
    AdminArrangement, Decision, ReferenceId, RequestStatus, Requester, TaxiRequest, TripDetails,
    TripType,
};
use cabflow_core::domain::employee::{ApproverContact, EmployeeId};

use super::{
    decode_err, format_timestamp, parse_decimal, parse_optional_timestamp, parse_timestamp,
    OverdueQuery, RepositoryError, RequestFilter, TaxiRequestRepository,
};
use crate::DbPool;

const SELECT_COLUMNS: &str = "SELECT reference_id, requester_employee_id, requester_name,
        requester_email, requester_phone, department, location, purpose, pickup_location,
        drop_location, pickup_at, return_at, passengers, trip_type, remarks,
        approver_employee_id, approver_name, approver_email, approver_phone, routing_rule_id,
        status, manager_actor, manager_comment, manager_decided_at, admin_actor, admin_comment,
        admin_decided_at, vendor_name, cab_number, driver_name, driver_phone, estimated_fare,
        arrangement_comment, rejection_reason, reminder_count, last_reminder_at,
        stage_entered_at, created_at, updated_at
    FROM taxi_request";

pub struct SqlTaxiRequestRepository {
    pool: DbPool,
}

impl SqlTaxiRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decision_from_row(
    row: &SqliteRow,
    actor_column: &str,
    comment_column: &str,
    at_column: &str,
) -> Result<Option<Decision>, RepositoryError> {
    let actor: Option<String> = row.try_get(actor_column).map_err(decode_err)?;
    let comment: Option<String> = row.try_get(comment_column).map_err(decode_err)?;
    let decided_at: Option<String> = row.try_get(at_column).map_err(decode_err)?;

    match (actor, parse_optional_timestamp(at_column, decided_at)?) {
        (Some(actor_id), Some(decided_at)) => Ok(Some(Decision { actor_id, comment, decided_at })),
        _ => Ok(None),
    }
}

fn arrangement_from_row(row: &SqliteRow) -> Result<Option<AdminArrangement>, RepositoryError> {
    let vendor_name: Option<String> = row.try_get("vendor_name").map_err(decode_err)?;
    let Some(vendor_name) = vendor_name else {
        return Ok(None);
    };
    let fare: String = row
        .try_get::<Option<String>, _>("estimated_fare")
        .map_err(decode_err)?
        .unwrap_or_else(|| "0".to_owned());

    Ok(Some(AdminArrangement {
        vendor_name,
        cab_number: row
            .try_get::<Option<String>, _>("cab_number")
            .map_err(decode_err)?
            .unwrap_or_default(),
        driver_name: row
            .try_get::<Option<String>, _>("driver_name")
            .map_err(decode_err)?
            .unwrap_or_default(),
        driver_phone: row
            .try_get::<Option<String>, _>("driver_phone")
            .map_err(decode_err)?
            .unwrap_or_default(),
        estimated_fare: parse_decimal("estimated_fare", &fare)?,
        admin_comment: row.try_get("arrangement_comment").map_err(decode_err)?,
    }))
}

fn row_to_request(row: &SqliteRow) -> Result<TaxiRequest, RepositoryError> {
    let status_key: String = row.try_get("status").map_err(decode_err)?;
    let status = RequestStatus::parse_key(&status_key)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown status `{status_key}`")))?;
    let trip_type_key: String = row.try_get("trip_type").map_err(decode_err)?;
    let trip_type = TripType::parse_key(&trip_type_key)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown trip type `{trip_type_key}`")))?;
    let passengers: i64 = row.try_get("passengers").map_err(decode_err)?;
    let reminder_count: i64 = row.try_get("reminder_count").map_err(decode_err)?;

    let pickup_at: String = row.try_get("pickup_at").map_err(decode_err)?;
    let stage_entered_at: String = row.try_get("stage_entered_at").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_err)?;

    Ok(TaxiRequest {
        id: ReferenceId(row.try_get("reference_id").map_err(decode_err)?),
        requester: Requester {
            employee_id: EmployeeId(row.try_get("requester_employee_id").map_err(decode_err)?),
            name: row.try_get("requester_name").map_err(decode_err)?,
            email: row.try_get("requester_email").map_err(decode_err)?,
            phone: row.try_get("requester_phone").map_err(decode_err)?,
        },
        department: row.try_get("department").map_err(decode_err)?,
        location: row.try_get("location").map_err(decode_err)?,
        trip: TripDetails {
            purpose: row.try_get("purpose").map_err(decode_err)?,
            pickup_location: row.try_get("pickup_location").map_err(decode_err)?,
            drop_location: row.try_get("drop_location").map_err(decode_err)?,
            pickup_at: parse_timestamp("pickup_at", &pickup_at)?,
            return_at: parse_optional_timestamp(
                "return_at",
                row.try_get("return_at").map_err(decode_err)?,
            )?,
            passengers: u8::try_from(passengers).map_err(decode_err)?,
            trip_type,
            remarks: row.try_get("remarks").map_err(decode_err)?,
        },
        approver: ApproverContact {
            employee_id: EmployeeId(row.try_get("approver_employee_id").map_err(decode_err)?),
            name: row.try_get("approver_name").map_err(decode_err)?,
            email: row.try_get("approver_email").map_err(decode_err)?,
            phone: row.try_get("approver_phone").map_err(decode_err)?,
        },
        routing_rule_id: row.try_get("routing_rule_id").map_err(decode_err)?,
        status,
        manager_decision: decision_from_row(
            row,
            "manager_actor",
            "manager_comment",
            "manager_decided_at",
        )?,
        admin_decision: decision_from_row(row, "admin_actor", "admin_comment", "admin_decided_at")?,
        arrangement: arrangement_from_row(row)?,
        rejection_reason: row.try_get("rejection_reason").map_err(decode_err)?,
        reminder_count: u32::try_from(reminder_count).map_err(decode_err)?,
        last_reminder_at: parse_optional_timestamp(
            "last_reminder_at",
            row.try_get("last_reminder_at").map_err(decode_err)?,
        )?,
        stage_entered_at: parse_timestamp("stage_entered_at", &stage_entered_at)?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl TaxiRequestRepository for SqlTaxiRequestRepository {
    async fn find(&self, id: &ReferenceId) -> Result<Option<TaxiRequest>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE reference_id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_request).transpose()
    }

    async fn save(&self, request: TaxiRequest) -> Result<(), RepositoryError> {
        let manager = request.manager_decision.as_ref();
        let admin = request.admin_decision.as_ref();
        let arrangement = request.arrangement.as_ref();

        sqlx::query(
            "INSERT INTO taxi_request (
                reference_id, requester_employee_id, requester_name, requester_email,
                requester_phone, department, location, purpose, pickup_location, drop_location,
                pickup_at, return_at, passengers, trip_type, remarks, approver_employee_id,
                approver_name, approver_email, approver_phone, routing_rule_id, status,
                manager_actor, manager_comment, manager_decided_at, admin_actor, admin_comment,
                admin_decided_at, vendor_name, cab_number, driver_name, driver_phone,
                estimated_fare, arrangement_comment, rejection_reason, reminder_count,
                last_reminder_at, stage_entered_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                     ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(reference_id) DO UPDATE SET
                approver_employee_id = excluded.approver_employee_id,
                approver_name = excluded.approver_name,
                approver_email = excluded.approver_email,
                approver_phone = excluded.approver_phone,
                status = excluded.status,
                manager_actor = excluded.manager_actor,
                manager_comment = excluded.manager_comment,
                manager_decided_at = excluded.manager_decided_at,
                admin_actor = excluded.admin_actor,
                admin_comment = excluded.admin_comment,
                admin_decided_at = excluded.admin_decided_at,
                vendor_name = excluded.vendor_name,
                cab_number = excluded.cab_number,
                driver_name = excluded.driver_name,
                driver_phone = excluded.driver_phone,
                estimated_fare = excluded.estimated_fare,
                arrangement_comment = excluded.arrangement_comment,
                rejection_reason = excluded.rejection_reason,
                reminder_count = excluded.reminder_count,
                last_reminder_at = excluded.last_reminder_at,
                stage_entered_at = excluded.stage_entered_at,
                updated_at = excluded.updated_at",
        )
        .bind(&request.id.0)
        .bind(&request.requester.employee_id.0)
        .bind(&request.requester.name)
        .bind(&request.requester.email)
        .bind(&request.requester.phone)
        .bind(&request.department)
        .bind(&request.location)
        .bind(&request.trip.purpose)
        .bind(&request.trip.pickup_location)
        .bind(&request.trip.drop_location)
        .bind(format_timestamp(request.trip.pickup_at))
        .bind(request.trip.return_at.map(format_timestamp))
        .bind(i64::from(request.trip.passengers))
        .bind(request.trip.trip_type.as_key())
        .bind(&request.trip.remarks)
        .bind(&request.approver.employee_id.0)
        .bind(&request.approver.name)
        .bind(&request.approver.email)
        .bind(&request.approver.phone)
        .bind(request.routing_rule_id)
        .bind(request.status.as_key())
        .bind(manager.map(|d| d.actor_id.clone()))
        .bind(manager.and_then(|d| d.comment.clone()))
        .bind(manager.map(|d| format_timestamp(d.decided_at)))
        .bind(admin.map(|d| d.actor_id.clone()))
        .bind(admin.and_then(|d| d.comment.clone()))
        .bind(admin.map(|d| format_timestamp(d.decided_at)))
        .bind(arrangement.map(|a| a.vendor_name.clone()))
        .bind(arrangement.map(|a| a.cab_number.clone()))
        .bind(arrangement.map(|a| a.driver_name.clone()))
        .bind(arrangement.map(|a| a.driver_phone.clone()))
        .bind(arrangement.map(|a| a.estimated_fare.to_string()))
        .bind(arrangement.and_then(|a| a.admin_comment.clone()))
        .bind(&request.rejection_reason)
        .bind(i64::from(request.reminder_count))
        .bind(request.last_reminder_at.map(format_timestamp))
        .bind(format_timestamp(request.stage_entered_at))
        .bind(format_timestamp(request.created_at))
        .bind(format_timestamp(request.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_requester(
        &self,
        employee_id: &EmployeeId,
        limit: u32,
    ) -> Result<Vec<TaxiRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS}
             WHERE requester_employee_id = ? COLLATE NOCASE
             ORDER BY created_at DESC
             LIMIT ?"
        ))
        .bind(employee_id.as_str().trim())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_request).collect()
    }

    async fn list_pending_for_approver(
        &self,
        approver_id: &EmployeeId,
    ) -> Result<Vec<TaxiRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS}
             WHERE approver_employee_id = ? COLLATE NOCASE AND status = ?
             ORDER BY created_at ASC"
        ))
        .bind(approver_id.as_str().trim())
        .bind(RequestStatus::PendingManagerApproval.as_key())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_request).collect()
    }

    async fn list_pending_for_admin(&self) -> Result<Vec<TaxiRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS}
             WHERE status = ?
             ORDER BY stage_entered_at ASC, reference_id ASC"
        ))
        .bind(RequestStatus::PendingAdminApproval.as_key())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_request).collect()
    }

    async fn list(&self, filter: &RequestFilter) -> Result<Vec<TaxiRequest>, RepositoryError> {
        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
        builder.push(" WHERE 1 = 1");
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_key());
        }
        if let Some(department) = &filter.department {
            builder
                .push(" AND department = ")
                .push_bind(department.trim().to_owned())
                .push(" COLLATE NOCASE");
        }
        if let Some(from) = filter.pickup_from {
            builder.push(" AND pickup_at >= ").push_bind(format_timestamp(from));
        }
        if let Some(to) = filter.pickup_to {
            builder.push(" AND pickup_at <= ").push_bind(format_timestamp(to));
        }
        builder.push(" ORDER BY created_at DESC LIMIT ").push_bind(filter.effective_limit());

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_request).collect()
    }

    async fn list_overdue(&self, query: OverdueQuery) -> Result<Vec<TaxiRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS}
             WHERE status IN (?, ?)
               AND stage_entered_at <= ?
               AND reminder_count < ?
               AND (last_reminder_at IS NULL OR last_reminder_at <= ?)
             ORDER BY stage_entered_at ASC"
        ))
        .bind(RequestStatus::PendingManagerApproval.as_key())
        .bind(RequestStatus::PendingAdminApproval.as_key())
        .bind(format_timestamp(query.stage_entered_before))
        .bind(i64::from(query.max_reminders))
        .bind(format_timestamp(query.last_reminder_before))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_request).collect()
    }

    async fn record_reminder(
        &self,
        id: &ReferenceId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE taxi_request
             SET reminder_count = reminder_count + 1, last_reminder_at = ?, updated_at = ?
             WHERE reference_id = ?",
        )
        .bind(format_timestamp(at))
        .bind(format_timestamp(at))
        .bind(&id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rust_decimal::Decimal;

    use cabflow_core::domain::booking::{AdminArrangement, Decision, RequestStatus};
    use cabflow_core::domain::employee::EmployeeId;

    use super::SqlTaxiRequestRepository;
    use crate::repositories::test_support::{at, sample_request, setup};
    use crate::repositories::{OverdueQuery, RequestFilter, TaxiRequestRepository};

    #[tokio::test]
    async fn save_and_find_preserves_decisions_and_arrangement() {
        let repo = SqlTaxiRequestRepository::new(setup().await);
        let mut request = sample_request("TX-261018-AAAAAA", "E1001", "E2001");
        request.manager_decision = Some(Decision {
            actor_id: "E2001".to_owned(),
            comment: Some("ok".to_owned()),
            decided_at: at(10),
        });
        request.status = RequestStatus::Approved;
        request.admin_decision =
            Some(Decision { actor_id: "E9001".to_owned(), comment: None, decided_at: at(11) });
        request.arrangement = Some(AdminArrangement {
            vendor_name: "City Cabs".to_owned(),
            cab_number: "MH01AB1234".to_owned(),
            driver_name: "Suresh".to_owned(),
            driver_phone: "919876543210".to_owned(),
            estimated_fare: Decimal::new(125050, 2),
            admin_comment: Some("AC sedan".to_owned()),
        });

        repo.save(request.clone()).await.expect("save");
        let found = repo.find(&request.id).await.expect("find").expect("present");

        assert_eq!(found, request);
    }

    #[tokio::test]
    async fn save_upserts_status_changes() {
        let repo = SqlTaxiRequestRepository::new(setup().await);
        let mut request = sample_request("TX-261018-BBBBBB", "E1001", "E2001");
        repo.save(request.clone()).await.expect("insert");

        request.transition_to(RequestStatus::Rejected, at(12)).expect("transition");
        request.rejection_reason = Some("Not business travel".to_owned());
        repo.save(request.clone()).await.expect("update");

        let found = repo.find(&request.id).await.expect("find").expect("present");
        assert_eq!(found.status, RequestStatus::Rejected);
        assert_eq!(found.rejection_reason.as_deref(), Some("Not business travel"));
    }

    #[tokio::test]
    async fn listings_filter_by_requester_approver_and_status() {
        let repo = SqlTaxiRequestRepository::new(setup().await);
        let first = sample_request("TX-261018-CCCCC1", "E1001", "E2001");
        let second = sample_request("TX-261018-CCCCC2", "E1002", "E2001");
        let mut third = sample_request("TX-261018-CCCCC3", "E1001", "E2002");
        third.status = RequestStatus::PendingAdminApproval;
        third.department = "Sales".to_owned();
        for request in [&first, &second, &third] {
            repo.save(request.clone()).await.expect("save");
        }

        let mine = repo
            .list_for_requester(&EmployeeId("e1001".to_owned()), 50)
            .await
            .expect("list mine");
        assert_eq!(mine.len(), 2);

        let queue =
            repo.list_pending_for_approver(&EmployeeId("E2001".to_owned())).await.expect("queue");
        assert_eq!(queue.len(), 2);

        let admin_queue = repo
            .list(&RequestFilter {
                status: Some(RequestStatus::PendingAdminApproval),
                department: Some("sales".to_owned()),
                ..RequestFilter::default()
            })
            .await
            .expect("filtered");
        assert_eq!(admin_queue.len(), 1);
        assert_eq!(admin_queue[0].id, third.id);
    }

    #[tokio::test]
    async fn overdue_selection_respects_cap_and_last_reminder() {
        let repo = SqlTaxiRequestRepository::new(setup().await);
        let fresh = sample_request("TX-261018-DDDDD1", "E1001", "E2001");
        let mut capped = sample_request("TX-261018-DDDDD2", "E1001", "E2001");
        capped.reminder_count = 3;
        let mut recently_reminded = sample_request("TX-261018-DDDDD3", "E1001", "E2001");
        recently_reminded.reminder_count = 1;
        recently_reminded.last_reminder_at = Some(at(15) - Duration::minutes(10));
        for request in [&fresh, &capped, &recently_reminded] {
            repo.save(request.clone()).await.expect("save");
        }

        let now = at(15);
        let query = OverdueQuery {
            stage_entered_before: now - Duration::hours(4),
            last_reminder_before: now - Duration::minutes(30),
            max_reminders: 3,
        };
        let overdue = repo.list_overdue(query).await.expect("overdue");
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, fresh.id);

        repo.record_reminder(&fresh.id, now).await.expect("record");
        let reloaded = repo.find(&fresh.id).await.expect("find").expect("present");
        assert_eq!(reloaded.reminder_count, 1);
        assert_eq!(reloaded.last_reminder_at, Some(now));
        assert!(repo.list_overdue(query).await.expect("overdue again").is_empty());
    }

    #[tokio::test]
    async fn admin_queue_is_uncapped_and_longest_waiting_first() {
        let repo = SqlTaxiRequestRepository::new(setup().await);
        for index in 0..205_i64 {
            let mut request =
                sample_request(&format!("TX-261018-Q{index:05}"), "E1001", "E2001");
            request.status = RequestStatus::PendingAdminApproval;
            request.stage_entered_at = at(9) + Duration::minutes(205 - index);
            repo.save(request).await.expect("save");
        }
        let mut approved = sample_request("TX-261018-QDONE1", "E1001", "E2001");
        approved.status = RequestStatus::Approved;
        repo.save(approved).await.expect("save");

        let queue = repo.list_pending_for_admin().await.expect("queue");
        assert_eq!(queue.len(), 205);
        assert_eq!(queue[0].id.0, "TX-261018-Q00204");
        assert!(queue.windows(2).all(|pair| pair[0].stage_entered_at <= pair[1].stage_entered_at));
    }
}
