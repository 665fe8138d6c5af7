use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, types::Json};
use tracing::error;
use uuid::Uuid;

use super::{
    AppointmentCountFilter, AppointmentQuery, CampaignQuery, DataGateway, GatewayResult,
    MessageQuery, PatientFilter,
};
use crate::models::{
    AppointmentRow, AppointmentStatus, CampaignRecipientRow, CampaignRow, ClinicRow, MessageRow,
    NewAppointment, NewCampaign, NewMessage, NewPatient, OneOrMany, PatientContact, PatientRow,
    PractitionerRef, ProfileRow, RecipientDraft, RecipientStatus, ReminderContext,
    SessionLookupRow, SessionTokenRow, UserRow,
};

pub struct PostgresGateway {
    pool: PgPool,
}

impl PostgresGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const PATIENT_COLUMNS: &str = r#"
    id,
    clinic_id,
    practitioner_id,
    first_name,
    last_name,
    phone,
    email,
    language,
    accepts_short_notice
"#;

const APPOINTMENT_COLUMNS: &str = r#"
    id,
    clinic_id,
    practitioner_id,
    patient_id,
    starts_at,
    status,
    notes
"#;

const CAMPAIGN_COLUMNS: &str = r#"
    id,
    clinic_id,
    created_by,
    name,
    campaign_type,
    channel,
    message_template,
    status,
    created_at,
    started_at,
    completed_at
"#;

#[derive(Debug, FromRow)]
struct ReminderContextRaw {
    appointment_id: Uuid,
    clinic_id: Uuid,
    starts_at: DateTime<Utc>,
    patient: Option<Json<OneOrMany<PatientContact>>>,
    practitioner: Option<Json<OneOrMany<PractitionerRef>>>,
    clinic: Option<Json<OneOrMany<ClinicRow>>>,
}

impl From<ReminderContextRaw> for ReminderContext {
    fn from(raw: ReminderContextRaw) -> Self {
        Self {
            appointment_id: raw.appointment_id,
            clinic_id: raw.clinic_id,
            starts_at: raw.starts_at,
            patient: raw.patient.and_then(|Json(rel)| rel.into_first()),
            practitioner: raw.practitioner.and_then(|Json(rel)| rel.into_first()),
            clinic: raw.clinic.and_then(|Json(rel)| rel.into_first()),
        }
    }
}

#[async_trait::async_trait]
impl DataGateway for PostgresGateway {
    async fn find_user_by_email(&self, email: &str) -> GatewayResult<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT user_id, email, password_hash, is_active
            FROM app_user
            WHERE lower(email) = lower($1)
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_session(
        &self,
        user_id: Uuid,
        token_hash: &str,
        device_name: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> GatewayResult<SessionTokenRow> {
        let row = sqlx::query_as::<_, SessionTokenRow>(
            r#"
            INSERT INTO session_token (user_id, session_token_hash, device_name, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING session_token_id, expires_at
            "#,
        )
        .bind(user_id)
        .bind(token_hash)
        .bind(device_name)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_active_session(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> GatewayResult<Option<SessionLookupRow>> {
        let row = sqlx::query_as::<_, SessionLookupRow>(
            r#"
            SELECT st.session_token_id, st.user_id
            FROM session_token st
            JOIN app_user u ON u.user_id = st.user_id
            WHERE st.session_token_hash = $1
              AND st.revoked_at IS NULL
              AND st.expires_at > $2
              AND u.is_active = true
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn touch_session(&self, session_token_id: Uuid) -> GatewayResult<()> {
        sqlx::query(
            r#"
            UPDATE session_token
            SET last_seen_at = now()
            WHERE session_token_id = $1
            "#,
        )
        .bind(session_token_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke_session(&self, session_token_id: Uuid) -> GatewayResult<()> {
        sqlx::query(
            r#"
            UPDATE session_token
            SET revoked_at = now()
            WHERE session_token_id = $1
              AND revoked_at IS NULL
            "#,
        )
        .bind(session_token_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_profile(&self, user_id: Uuid) -> GatewayResult<Option<ProfileRow>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT id, clinic_id, role, full_name
            FROM profiles
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_clinic(&self, clinic_id: Uuid) -> GatewayResult<Option<ClinicRow>> {
        let row = sqlx::query_as::<_, ClinicRow>(
            r#"
            SELECT id, name, phone
            FROM clinics
            WHERE id = $1
            "#,
        )
        .bind(clinic_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_patients(
        &self,
        clinic_id: Uuid,
        filter: &PatientFilter,
    ) -> GatewayResult<Vec<PatientRow>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT ");
        qb.push(PATIENT_COLUMNS);
        qb.push(" FROM patients WHERE clinic_id = ");
        qb.push_bind(clinic_id);

        if let Some(ids) = &filter.ids {
            qb.push(" AND id = ANY(");
            qb.push_bind(ids.clone());
            qb.push(")");
        }
        if let Some(flag) = filter.accepts_short_notice {
            qb.push(" AND accepts_short_notice = ");
            qb.push_bind(flag);
        }

        qb.push(" ORDER BY last_name ASC, first_name ASC");

        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ");
            qb.push_bind(limit);
        }

        let rows = qb
            .build_query_as::<PatientRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn count_patients(&self, clinic_id: Uuid) -> GatewayResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM patients
            WHERE clinic_id = $1
            "#,
        )
        .bind(clinic_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn insert_patient(&self, patient: &NewPatient) -> GatewayResult<PatientRow> {
        let sql = format!(
            r#"
            INSERT INTO patients
              (clinic_id, practitioner_id, first_name, last_name, phone, email, language,
               accepts_short_notice)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {PATIENT_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, PatientRow>(&sql)
            .bind(patient.clinic_id)
            .bind(patient.practitioner_id)
            .bind(&patient.first_name)
            .bind(&patient.last_name)
            .bind(&patient.phone)
            .bind(&patient.email)
            .bind(&patient.language)
            .bind(patient.accepts_short_notice)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!(clinic_id = %patient.clinic_id, "unable to insert patient: {e:?}");
                e
            })?;
        Ok(row)
    }

    async fn last_visits(&self, clinic_id: Uuid) -> GatewayResult<HashMap<Uuid, DateTime<Utc>>> {
        let rows: Vec<(Uuid, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT patient_id, MAX(starts_at) AS last_visit_at
            FROM appointments
            WHERE clinic_id = $1
              AND status IN ('completed', 'confirmed')
            GROUP BY patient_id
            "#,
        )
        .bind(clinic_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn practitioner_names(&self, clinic_id: Uuid) -> GatewayResult<HashMap<Uuid, String>> {
        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT id, full_name
            FROM practitioners
            WHERE clinic_id = $1
            "#,
        )
        .bind(clinic_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn find_appointment(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
    ) -> GatewayResult<Option<AppointmentRow>> {
        let sql =
            format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = $1 AND clinic_id = $2");
        let row = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(appointment_id)
            .bind(clinic_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn count_appointments(
        &self,
        clinic_id: Uuid,
        filter: &AppointmentCountFilter,
    ) -> GatewayResult<i64> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM appointments WHERE clinic_id = ");
        qb.push_bind(clinic_id);

        if let Some(status) = filter.status {
            qb.push(" AND status = ");
            qb.push_bind(status);
        }
        if let Some(from) = filter.starts_from {
            qb.push(" AND starts_at >= ");
            qb.push_bind(from);
        }
        if let Some(before) = filter.starts_before {
            qb.push(" AND starts_at < ");
            qb.push_bind(before);
        }

        let count: i64 = qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn list_appointments(
        &self,
        clinic_id: Uuid,
        query: &AppointmentQuery,
    ) -> GatewayResult<Vec<AppointmentRow>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT ");
        qb.push(APPOINTMENT_COLUMNS);
        qb.push(" FROM appointments WHERE clinic_id = ");
        qb.push_bind(clinic_id);

        if let Some(status) = query.status {
            qb.push(" AND status = ");
            qb.push_bind(status);
        }
        if let Some(from) = query.starts_from {
            qb.push(" AND starts_at >= ");
            qb.push_bind(from);
        }

        qb.push(" ORDER BY starts_at ASC LIMIT ");
        qb.push_bind(query.limit);

        let rows = qb
            .build_query_as::<AppointmentRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn insert_appointment(
        &self,
        appointment: &NewAppointment,
    ) -> GatewayResult<AppointmentRow> {
        let sql = format!(
            r#"
            INSERT INTO appointments (clinic_id, practitioner_id, patient_id, starts_at, status, notes)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {APPOINTMENT_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(appointment.clinic_id)
            .bind(appointment.practitioner_id)
            .bind(appointment.patient_id)
            .bind(appointment.starts_at)
            .bind(AppointmentStatus::Scheduled)
            .bind(&appointment.notes)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!(clinic_id = %appointment.clinic_id, "unable to insert appointment: {e:?}");
                e
            })?;
        Ok(row)
    }

    async fn update_appointment_status(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        status: AppointmentStatus,
    ) -> GatewayResult<Option<AppointmentRow>> {
        let sql = format!(
            r#"
            UPDATE appointments
            SET status = $3,
                updated_at = now()
            WHERE id = $1
              AND clinic_id = $2
            RETURNING {APPOINTMENT_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(appointment_id)
            .bind(clinic_id)
            .bind(status)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn reminder_context(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
    ) -> GatewayResult<Option<ReminderContext>> {
        let raw = sqlx::query_as::<_, ReminderContextRaw>(
            r#"
            SELECT
              a.id AS appointment_id,
              a.clinic_id,
              a.starts_at,
              (SELECT to_jsonb(p) FROM (
                  SELECT id, first_name, last_name, phone, language
                  FROM patients
                  WHERE id = a.patient_id AND clinic_id = a.clinic_id
              ) p) AS patient,
              (SELECT to_jsonb(d) FROM (
                  SELECT full_name
                  FROM practitioners
                  WHERE id = a.practitioner_id AND clinic_id = a.clinic_id
              ) d) AS practitioner,
              (SELECT to_jsonb(c) FROM (
                  SELECT id, name, phone
                  FROM clinics
                  WHERE id = a.clinic_id
              ) c) AS clinic
            FROM appointments a
            WHERE a.id = $1
              AND a.clinic_id = $2
            "#,
        )
        .bind(appointment_id)
        .bind(clinic_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(raw.map(ReminderContext::from))
    }

    async fn create_campaign(
        &self,
        campaign: &NewCampaign,
        recipients: &[RecipientDraft],
    ) -> GatewayResult<CampaignRow> {
        let mut tx = self.pool.begin().await?;

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            INSERT INTO campaigns
              (clinic_id, created_by, name, campaign_type, channel, message_template, status)
            VALUES (
            "#,
        );
        let mut values = qb.separated(", ");
        values.push_bind(campaign.clinic_id);
        values.push_bind(campaign.created_by);
        values.push_bind(&campaign.name);
        values.push_bind(campaign.campaign_type);
        values.push_bind(campaign.channel);
        values.push_bind(&campaign.message_template);
        values.push("'draft'");
        qb.push(") RETURNING ");
        qb.push(CAMPAIGN_COLUMNS);

        let row: CampaignRow = qb
            .build_query_as::<CampaignRow>()
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                error!(clinic_id = %campaign.clinic_id, "unable to insert campaign: {e:?}");
                e
            })?;

        if !recipients.is_empty() {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO campaign_recipients (campaign_id, clinic_id, patient_id, appointment_id, status) ",
            );
            qb.push_values(recipients, |mut b, r| {
                b.push_bind(row.id)
                    .push_bind(campaign.clinic_id)
                    .push_bind(r.patient_id)
                    .push_bind(r.appointment_id)
                    .push_bind(RecipientStatus::Pending);
            });

            qb.build().execute(&mut *tx).await.map_err(|e| {
                error!(campaign_id = %row.id, "unable to insert campaign recipients: {e:?}");
                e
            })?;
        }

        tx.commit().await?;
        Ok(row)
    }

    async fn find_campaign(
        &self,
        clinic_id: Uuid,
        campaign_id: Uuid,
    ) -> GatewayResult<Option<CampaignRow>> {
        let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = $1 AND clinic_id = $2");
        let row = sqlx::query_as::<_, CampaignRow>(&sql)
            .bind(campaign_id)
            .bind(clinic_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_campaigns(
        &self,
        clinic_id: Uuid,
        query: &CampaignQuery,
    ) -> GatewayResult<Vec<CampaignRow>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT ");
        qb.push(CAMPAIGN_COLUMNS);
        qb.push(" FROM campaigns WHERE clinic_id = ");
        qb.push_bind(clinic_id);

        if let Some(kind) = query.campaign_type {
            qb.push(" AND campaign_type = ");
            qb.push_bind(kind);
        }

        qb.push(" ORDER BY created_at DESC LIMIT ");
        qb.push_bind(query.limit);

        let rows = qb
            .build_query_as::<CampaignRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn list_recipients(
        &self,
        clinic_id: Uuid,
        campaign_id: Uuid,
    ) -> GatewayResult<Vec<CampaignRecipientRow>> {
        let rows = sqlx::query_as::<_, CampaignRecipientRow>(
            r#"
            SELECT id, campaign_id, clinic_id, patient_id, appointment_id, status, last_status_at
            FROM campaign_recipients
            WHERE campaign_id = $1
              AND clinic_id = $2
            ORDER BY last_status_at ASC, id ASC
            "#,
        )
        .bind(campaign_id)
        .bind(clinic_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_messages(&self, messages: &[NewMessage]) -> GatewayResult<usize> {
        if messages.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            INSERT INTO messages
              (clinic_id, patient_id, appointment_id, channel, message_type, direction,
               body, status, provider_message_id, sent_at)
            "#,
        );
        qb.push_values(messages, |mut b, m| {
            b.push_bind(m.clinic_id)
                .push_bind(m.patient_id)
                .push_bind(m.appointment_id)
                .push_bind(m.channel)
                .push_bind(m.message_type)
                .push_bind(m.direction)
                .push_bind(&m.body)
                .push_bind(m.status)
                .push_bind(&m.provider_message_id)
                .push_bind(m.sent_at);
        });

        let res = qb.build().execute(&mut *tx).await.map_err(|e| {
            error!(count = messages.len(), "unable to insert messages: {e:?}");
            e
        })?;

        tx.commit().await?;
        Ok(res.rows_affected() as usize)
    }

    async fn list_messages(
        &self,
        clinic_id: Uuid,
        query: &MessageQuery,
    ) -> GatewayResult<Vec<MessageRow>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            SELECT
              id,
              clinic_id,
              patient_id,
              appointment_id,
              channel,
              message_type,
              direction,
              body,
              status,
              provider_message_id,
              sent_at,
              received_at,
              created_at
            FROM messages
            WHERE clinic_id =
            "#,
        );
        qb.push_bind(clinic_id);

        if let Some(patient_id) = query.patient_id {
            qb.push(" AND patient_id = ");
            qb.push_bind(patient_id);
        }
        if let Some(appointment_id) = query.appointment_id {
            qb.push(" AND appointment_id = ");
            qb.push_bind(appointment_id);
        }

        qb.push(" ORDER BY created_at DESC LIMIT ");
        qb.push_bind(query.limit);

        let rows = qb
            .build_query_as::<MessageRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
