use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::{
    AppointmentCountFilter, AppointmentQuery, CampaignQuery, DataGateway, GatewayError,
    GatewayResult, MessageQuery, PatientFilter,
};
use crate::models::{
    AppointmentRow, AppointmentStatus, CampaignRecipientRow, CampaignRow, CampaignStatus,
    ClinicRow, MessageRow, NewAppointment, NewCampaign, NewMessage, NewPatient, PatientContact,
    PatientRow, PractitionerRef, PractitionerRow, ProfileRow, RecipientDraft, RecipientStatus,
    ReminderContext, Role, SessionLookupRow, SessionTokenRow, UserRow,
};

#[derive(Debug, Clone)]
struct SessionRecord {
    session_token_id: Uuid,
    user_id: Uuid,
    token_hash: String,
    expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Store {
    users: Vec<UserRow>,
    sessions: Vec<SessionRecord>,
    profiles: Vec<ProfileRow>,
    clinics: Vec<ClinicRow>,
    practitioners: Vec<PractitionerRow>,
    patients: Vec<PatientRow>,
    appointments: Vec<AppointmentRow>,
    campaigns: Vec<CampaignRow>,
    recipients: Vec<CampaignRecipientRow>,
    messages: Vec<MessageRow>,
}

// Same references the composite foreign keys enforce in Postgres.
impl Store {
    fn check_patient(&self, clinic_id: Uuid, patient_id: Uuid) -> GatewayResult<()> {
        if self
            .patients
            .iter()
            .any(|p| p.id == patient_id && p.clinic_id == clinic_id)
        {
            Ok(())
        } else {
            Err(GatewayError::Constraint(format!(
                "patient {patient_id} does not belong to clinic {clinic_id}"
            )))
        }
    }

    fn check_practitioner(&self, clinic_id: Uuid, practitioner_id: Uuid) -> GatewayResult<()> {
        if self
            .practitioners
            .iter()
            .any(|d| d.id == practitioner_id && d.clinic_id == clinic_id)
        {
            Ok(())
        } else {
            Err(GatewayError::Constraint(format!(
                "practitioner {practitioner_id} does not belong to clinic {clinic_id}"
            )))
        }
    }

    fn check_appointment(&self, clinic_id: Uuid, appointment_id: Uuid) -> GatewayResult<()> {
        if self
            .appointments
            .iter()
            .any(|a| a.id == appointment_id && a.clinic_id == clinic_id)
        {
            Ok(())
        } else {
            Err(GatewayError::Constraint(format!(
                "appointment {appointment_id} does not belong to clinic {clinic_id}"
            )))
        }
    }
}

/// Gateway backed by process memory. Used by tests and by the `memory`
/// backend for local demos.
#[derive(Default)]
pub struct InMemoryGateway {
    store: Mutex<Store>,
    fail_recipient_inserts: AtomicBool,
    fail_message_inserts: AtomicBool,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> GatewayResult<std::sync::MutexGuard<'_, Store>> {
        self.store
            .lock()
            .map_err(|_| GatewayError::Unavailable("in-memory store poisoned".into()))
    }

    /// Makes every following recipient insert fail, after the campaign row
    /// itself has been written.
    #[cfg(test)]
    pub fn fail_recipient_inserts(&self, fail: bool) {
        self.fail_recipient_inserts.store(fail, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn fail_message_inserts(&self, fail: bool) {
        self.fail_message_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn add_clinic(&self, name: &str, phone: Option<&str>) -> GatewayResult<ClinicRow> {
        let clinic = ClinicRow {
            id: Uuid::new_v4(),
            name: name.to_string(),
            phone: phone.map(str::to_string),
        };
        self.lock()?.clinics.push(clinic.clone());
        Ok(clinic)
    }

    /// Creates an active login plus its staff profile.
    pub fn add_staff(
        &self,
        clinic_id: Uuid,
        email: &str,
        password_hash: &str,
        role: Role,
        full_name: &str,
    ) -> GatewayResult<ProfileRow> {
        let user_id = Uuid::new_v4();
        let profile = ProfileRow {
            id: user_id,
            clinic_id,
            role,
            full_name: Some(full_name.to_string()),
        };
        let mut store = self.lock()?;
        store.users.push(UserRow {
            user_id,
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            is_active: true,
        });
        store.profiles.push(profile.clone());
        Ok(profile)
    }

    #[cfg(test)]
    pub fn deactivate_user(&self, user_id: Uuid) -> GatewayResult<()> {
        let mut store = self.lock()?;
        if let Some(u) = store.users.iter_mut().find(|u| u.user_id == user_id) {
            u.is_active = false;
        }
        Ok(())
    }

    pub fn add_practitioner(&self, clinic_id: Uuid, full_name: &str) -> GatewayResult<Uuid> {
        let id = Uuid::new_v4();
        self.lock()?.practitioners.push(PractitionerRow {
            id,
            clinic_id,
            full_name: full_name.to_string(),
        });
        Ok(id)
    }

    pub fn add_patient(&self, patient: PatientRow) -> GatewayResult<PatientRow> {
        self.lock()?.patients.push(patient.clone());
        Ok(patient)
    }

    pub fn add_appointment(
        &self,
        clinic_id: Uuid,
        practitioner_id: Uuid,
        patient_id: Uuid,
        starts_at: DateTime<Utc>,
        status: AppointmentStatus,
    ) -> GatewayResult<AppointmentRow> {
        let row = AppointmentRow {
            id: Uuid::new_v4(),
            clinic_id,
            practitioner_id,
            patient_id,
            starts_at,
            status,
            notes: None,
        };
        self.lock()?.appointments.push(row.clone());
        Ok(row)
    }

    /// A small clinic with one login per role, a handful of patients and
    /// appointment history covering the radar, last-minute and reminder flows.
    pub fn with_demo_data(password_hash: &str, now: DateTime<Utc>) -> GatewayResult<Self> {
        let gw = Self::new();
        let clinic = gw.add_clinic("Demo Dental Clinic", Some("+41 22 555 01 00"))?;
        gw.add_staff(clinic.id, "owner@demo.clinic", password_hash, Role::Owner, "Olivia Owner")?;
        gw.add_staff(
            clinic.id,
            "assistant@demo.clinic",
            password_hash,
            Role::Assistant,
            "Adam Assistant",
        )?;
        gw.add_staff(clinic.id, "dentist@demo.clinic", password_hash, Role::Dentist, "Dora Dent")?;
        let dr = gw.add_practitioner(clinic.id, "Dora Dent")?;

        let demo_patients = [
            ("Lea", "Baumann", Some(30 * 13), true),
            ("Marc", "Favre", None, true),
            ("Sofia", "Rossi", Some(60), false),
            ("Jonas", "Meier", Some(30 * 20), false),
        ];
        for (first, last, days_since_visit, short_notice) in demo_patients {
            let patient = gw.add_patient(PatientRow {
                id: Uuid::new_v4(),
                clinic_id: clinic.id,
                practitioner_id: Some(dr),
                first_name: first.to_string(),
                last_name: last.to_string(),
                phone: Some("+41 79 555 00 00".to_string()),
                email: None,
                language: Some("fr".to_string()),
                accepts_short_notice: short_notice,
            })?;
            if let Some(days) = days_since_visit {
                gw.add_appointment(
                    clinic.id,
                    dr,
                    patient.id,
                    now - Duration::days(days),
                    AppointmentStatus::Completed,
                )?;
            }
        }

        let first_patient = gw.lock()?.patients.first().map(|p| p.id);
        if let Some(first) = first_patient {
            gw.add_appointment(
                clinic.id,
                dr,
                first,
                now + Duration::hours(20),
                AppointmentStatus::Cancelled,
            )?;
        }

        Ok(gw)
    }
}

#[async_trait::async_trait]
impl DataGateway for InMemoryGateway {
    async fn find_user_by_email(&self, email: &str) -> GatewayResult<Option<UserRow>> {
        let store = self.lock()?;
        Ok(store
            .users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn insert_session(
        &self,
        user_id: Uuid,
        token_hash: &str,
        _device_name: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> GatewayResult<SessionTokenRow> {
        let record = SessionRecord {
            session_token_id: Uuid::new_v4(),
            user_id,
            token_hash: token_hash.to_string(),
            expires_at,
            revoked_at: None,
        };
        let row = SessionTokenRow {
            session_token_id: record.session_token_id,
            expires_at,
        };
        self.lock()?.sessions.push(record);
        Ok(row)
    }

    async fn find_active_session(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> GatewayResult<Option<SessionLookupRow>> {
        let store = self.lock()?;
        let found = store.sessions.iter().find(|s| {
            s.token_hash == token_hash
                && s.revoked_at.is_none()
                && s.expires_at > now
                && store
                    .users
                    .iter()
                    .any(|u| u.user_id == s.user_id && u.is_active)
        });
        Ok(found.map(|s| SessionLookupRow {
            session_token_id: s.session_token_id,
            user_id: s.user_id,
        }))
    }

    async fn touch_session(&self, _session_token_id: Uuid) -> GatewayResult<()> {
        // activity is not tracked in memory
        Ok(())
    }

    async fn revoke_session(&self, session_token_id: Uuid) -> GatewayResult<()> {
        let mut store = self.lock()?;
        if let Some(s) = store
            .sessions
            .iter_mut()
            .find(|s| s.session_token_id == session_token_id && s.revoked_at.is_none())
        {
            s.revoked_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn find_profile(&self, user_id: Uuid) -> GatewayResult<Option<ProfileRow>> {
        let store = self.lock()?;
        Ok(store.profiles.iter().find(|p| p.id == user_id).cloned())
    }

    async fn find_clinic(&self, clinic_id: Uuid) -> GatewayResult<Option<ClinicRow>> {
        let store = self.lock()?;
        Ok(store.clinics.iter().find(|c| c.id == clinic_id).cloned())
    }

    async fn list_patients(
        &self,
        clinic_id: Uuid,
        filter: &PatientFilter,
    ) -> GatewayResult<Vec<PatientRow>> {
        let store = self.lock()?;
        let mut rows: Vec<PatientRow> = store
            .patients
            .iter()
            .filter(|p| p.clinic_id == clinic_id)
            .filter(|p| filter.ids.as_ref().is_none_or(|ids| ids.contains(&p.id)))
            .filter(|p| {
                filter
                    .accepts_short_notice
                    .is_none_or(|flag| p.accepts_short_notice == flag)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.last_name
                .cmp(&b.last_name)
                .then_with(|| a.first_name.cmp(&b.first_name))
        });
        if let Some(limit) = filter.limit {
            rows.truncate(limit.max(0) as usize);
        }
        Ok(rows)
    }

    async fn count_patients(&self, clinic_id: Uuid) -> GatewayResult<i64> {
        let store = self.lock()?;
        Ok(store.patients.iter().filter(|p| p.clinic_id == clinic_id).count() as i64)
    }

    async fn insert_patient(&self, patient: &NewPatient) -> GatewayResult<PatientRow> {
        let mut store = self.lock()?;
        if let Some(practitioner_id) = patient.practitioner_id {
            store.check_practitioner(patient.clinic_id, practitioner_id)?;
        }
        let row = PatientRow {
            id: Uuid::new_v4(),
            clinic_id: patient.clinic_id,
            practitioner_id: patient.practitioner_id,
            first_name: patient.first_name.clone(),
            last_name: patient.last_name.clone(),
            phone: patient.phone.clone(),
            email: patient.email.clone(),
            language: patient.language.clone(),
            accepts_short_notice: patient.accepts_short_notice,
        };
        store.patients.push(row.clone());
        Ok(row)
    }

    async fn last_visits(&self, clinic_id: Uuid) -> GatewayResult<HashMap<Uuid, DateTime<Utc>>> {
        let store = self.lock()?;
        let mut out: HashMap<Uuid, DateTime<Utc>> = HashMap::new();
        for a in store
            .appointments
            .iter()
            .filter(|a| a.clinic_id == clinic_id && a.status.counts_as_visit())
        {
            out.entry(a.patient_id)
                .and_modify(|latest| *latest = (*latest).max(a.starts_at))
                .or_insert(a.starts_at);
        }
        Ok(out)
    }

    async fn practitioner_names(&self, clinic_id: Uuid) -> GatewayResult<HashMap<Uuid, String>> {
        let store = self.lock()?;
        Ok(store
            .practitioners
            .iter()
            .filter(|d| d.clinic_id == clinic_id)
            .map(|d| (d.id, d.full_name.clone()))
            .collect())
    }

    async fn find_appointment(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
    ) -> GatewayResult<Option<AppointmentRow>> {
        let store = self.lock()?;
        Ok(store
            .appointments
            .iter()
            .find(|a| a.id == appointment_id && a.clinic_id == clinic_id)
            .cloned())
    }

    async fn count_appointments(
        &self,
        clinic_id: Uuid,
        filter: &AppointmentCountFilter,
    ) -> GatewayResult<i64> {
        let store = self.lock()?;
        Ok(store
            .appointments
            .iter()
            .filter(|a| a.clinic_id == clinic_id && filter.matches(a))
            .count() as i64)
    }

    async fn list_appointments(
        &self,
        clinic_id: Uuid,
        query: &AppointmentQuery,
    ) -> GatewayResult<Vec<AppointmentRow>> {
        let store = self.lock()?;
        let mut rows: Vec<AppointmentRow> = store
            .appointments
            .iter()
            .filter(|a| a.clinic_id == clinic_id)
            .filter(|a| query.status.is_none_or(|s| a.status == s))
            .filter(|a| query.starts_from.is_none_or(|from| a.starts_at >= from))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.starts_at.cmp(&b.starts_at));
        rows.truncate(query.limit.max(0) as usize);
        Ok(rows)
    }

    async fn insert_appointment(
        &self,
        appointment: &NewAppointment,
    ) -> GatewayResult<AppointmentRow> {
        let mut store = self.lock()?;
        store.check_patient(appointment.clinic_id, appointment.patient_id)?;
        store.check_practitioner(appointment.clinic_id, appointment.practitioner_id)?;
        let row = AppointmentRow {
            id: Uuid::new_v4(),
            clinic_id: appointment.clinic_id,
            practitioner_id: appointment.practitioner_id,
            patient_id: appointment.patient_id,
            starts_at: appointment.starts_at,
            status: AppointmentStatus::Scheduled,
            notes: appointment.notes.clone(),
        };
        store.appointments.push(row.clone());
        Ok(row)
    }

    async fn update_appointment_status(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        status: AppointmentStatus,
    ) -> GatewayResult<Option<AppointmentRow>> {
        let mut store = self.lock()?;
        Ok(store
            .appointments
            .iter_mut()
            .find(|a| a.id == appointment_id && a.clinic_id == clinic_id)
            .map(|a| {
                a.status = status;
                a.clone()
            }))
    }

    async fn reminder_context(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
    ) -> GatewayResult<Option<ReminderContext>> {
        let store = self.lock()?;
        let Some(a) = store
            .appointments
            .iter()
            .find(|a| a.id == appointment_id && a.clinic_id == clinic_id)
        else {
            return Ok(None);
        };

        let patient = store
            .patients
            .iter()
            .find(|p| p.id == a.patient_id && p.clinic_id == clinic_id)
            .map(|p| PatientContact {
                id: p.id,
                first_name: p.first_name.clone(),
                last_name: p.last_name.clone(),
                phone: p.phone.clone(),
                language: p.language.clone(),
            });
        let practitioner = store
            .practitioners
            .iter()
            .find(|d| d.id == a.practitioner_id && d.clinic_id == clinic_id)
            .map(|d| PractitionerRef {
                full_name: d.full_name.clone(),
            });
        let clinic = store.clinics.iter().find(|c| c.id == clinic_id).cloned();

        Ok(Some(ReminderContext {
            appointment_id: a.id,
            clinic_id: a.clinic_id,
            starts_at: a.starts_at,
            patient,
            practitioner,
            clinic,
        }))
    }

    async fn create_campaign(
        &self,
        campaign: &NewCampaign,
        recipients: &[RecipientDraft],
    ) -> GatewayResult<CampaignRow> {
        let mut store = self.lock()?;
        for r in recipients {
            store.check_patient(campaign.clinic_id, r.patient_id)?;
            if let Some(appointment_id) = r.appointment_id {
                store.check_appointment(campaign.clinic_id, appointment_id)?;
            }
        }
        let now = Utc::now();

        let row = CampaignRow {
            id: Uuid::new_v4(),
            clinic_id: campaign.clinic_id,
            created_by: campaign.created_by,
            name: campaign.name.clone(),
            campaign_type: campaign.campaign_type,
            channel: campaign.channel,
            message_template: campaign.message_template.clone(),
            status: CampaignStatus::Draft,
            created_at: now,
            started_at: None,
            completed_at: None,
        };
        store.campaigns.push(row.clone());

        if self.fail_recipient_inserts.load(Ordering::SeqCst) {
            // roll back the campaign written above
            store.campaigns.retain(|c| c.id != row.id);
            return Err(GatewayError::Unavailable(
                "campaign_recipients insert rejected".into(),
            ));
        }

        store
            .recipients
            .extend(recipients.iter().map(|r| CampaignRecipientRow {
                id: Uuid::new_v4(),
                campaign_id: row.id,
                clinic_id: campaign.clinic_id,
                patient_id: r.patient_id,
                appointment_id: r.appointment_id,
                status: RecipientStatus::Pending,
                last_status_at: now,
            }));

        Ok(row)
    }

    async fn find_campaign(
        &self,
        clinic_id: Uuid,
        campaign_id: Uuid,
    ) -> GatewayResult<Option<CampaignRow>> {
        let store = self.lock()?;
        Ok(store
            .campaigns
            .iter()
            .find(|c| c.id == campaign_id && c.clinic_id == clinic_id)
            .cloned())
    }

    async fn list_campaigns(
        &self,
        clinic_id: Uuid,
        query: &CampaignQuery,
    ) -> GatewayResult<Vec<CampaignRow>> {
        let store = self.lock()?;
        let mut rows: Vec<CampaignRow> = store
            .campaigns
            .iter()
            .filter(|c| c.clinic_id == clinic_id)
            .filter(|c| query.campaign_type.is_none_or(|t| c.campaign_type == t))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(query.limit.max(0) as usize);
        Ok(rows)
    }

    async fn list_recipients(
        &self,
        clinic_id: Uuid,
        campaign_id: Uuid,
    ) -> GatewayResult<Vec<CampaignRecipientRow>> {
        let store = self.lock()?;
        Ok(store
            .recipients
            .iter()
            .filter(|r| r.campaign_id == campaign_id && r.clinic_id == clinic_id)
            .cloned()
            .collect())
    }

    async fn insert_messages(&self, messages: &[NewMessage]) -> GatewayResult<usize> {
        if self.fail_message_inserts.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("messages insert rejected".into()));
        }

        let mut store = self.lock()?;
        for m in messages {
            if let Some(patient_id) = m.patient_id {
                store.check_patient(m.clinic_id, patient_id)?;
            }
            if let Some(appointment_id) = m.appointment_id {
                store.check_appointment(m.clinic_id, appointment_id)?;
            }
        }
        let now = Utc::now();
        store.messages.extend(messages.iter().map(|m| MessageRow {
            id: Uuid::new_v4(),
            clinic_id: m.clinic_id,
            patient_id: m.patient_id,
            appointment_id: m.appointment_id,
            channel: m.channel,
            message_type: m.message_type,
            direction: m.direction,
            body: m.body.clone(),
            status: m.status,
            provider_message_id: m.provider_message_id.clone(),
            sent_at: m.sent_at,
            received_at: None,
            created_at: now,
        }));
        Ok(messages.len())
    }

    async fn list_messages(
        &self,
        clinic_id: Uuid,
        query: &MessageQuery,
    ) -> GatewayResult<Vec<MessageRow>> {
        let store = self.lock()?;
        let mut rows: Vec<MessageRow> = store
            .messages
            .iter()
            .filter(|m| m.clinic_id == clinic_id)
            .filter(|m| query.patient_id.is_none_or(|id| m.patient_id == Some(id)))
            .filter(|m| {
                query
                    .appointment_id
                    .is_none_or(|id| m.appointment_id == Some(id))
            })
            .cloned()
            .collect();
        // stable sort keeps insertion order for rows written in the same batch
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(query.limit.max(0) as usize);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient(clinic_id: Uuid, first: &str, last: &str, short_notice: bool) -> PatientRow {
        PatientRow {
            id: Uuid::new_v4(),
            clinic_id,
            practitioner_id: None,
            first_name: first.to_string(),
            last_name: last.to_string(),
            phone: Some("+41790000000".to_string()),
            email: None,
            language: None,
            accepts_short_notice: short_notice,
        }
    }

    #[tokio::test]
    async fn patients_are_scoped_and_sorted() {
        let gw = InMemoryGateway::new();
        let clinic = gw.add_clinic("A", None).unwrap();
        let other = gw.add_clinic("B", None).unwrap();
        gw.add_patient(patient(clinic.id, "Zoe", "Weber", true)).unwrap();
        gw.add_patient(patient(clinic.id, "Anna", "Brun", false)).unwrap();
        gw.add_patient(patient(other.id, "Eve", "Other", true)).unwrap();

        let rows = gw
            .list_patients(clinic.id, &PatientFilter::default())
            .await
            .unwrap();
        let names: Vec<&str> = rows.iter().map(|p| p.last_name.as_str()).collect();
        assert_eq!(names, vec!["Brun", "Weber"]);

        let flexible = gw
            .list_patients(
                clinic.id,
                &PatientFilter {
                    accepts_short_notice: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(flexible.len(), 1);
        assert_eq!(flexible[0].first_name, "Zoe");
        assert_eq!(gw.count_patients(other.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn last_visits_keeps_latest_completed_or_confirmed() {
        let gw = InMemoryGateway::new();
        let clinic = gw.add_clinic("A", None).unwrap();
        let dr = gw.add_practitioner(clinic.id, "Dr").unwrap();
        let p = gw.add_patient(patient(clinic.id, "Anna", "Brun", false)).unwrap();
        let now = Utc::now();

        gw.add_appointment(clinic.id, dr, p.id, now - Duration::days(400), AppointmentStatus::Completed)
            .unwrap();
        gw.add_appointment(clinic.id, dr, p.id, now - Duration::days(100), AppointmentStatus::Confirmed)
            .unwrap();
        gw.add_appointment(clinic.id, dr, p.id, now - Duration::days(10), AppointmentStatus::Cancelled)
            .unwrap();

        let visits = gw.last_visits(clinic.id).await.unwrap();
        assert_eq!(visits.get(&p.id), Some(&(now - Duration::days(100))));
    }

    fn reactivation(clinic_id: Uuid) -> NewCampaign {
        NewCampaign {
            clinic_id,
            created_by: Uuid::new_v4(),
            name: "x".into(),
            campaign_type: crate::models::CampaignType::Reactivation,
            channel: crate::models::Channel::Sms,
            message_template: "t".into(),
        }
    }

    #[tokio::test]
    async fn failed_recipient_insert_leaves_no_campaign() {
        let gw = InMemoryGateway::new();
        let clinic = gw.add_clinic("A", None).unwrap();
        let p = gw.add_patient(patient(clinic.id, "Anna", "Brun", false)).unwrap();
        gw.fail_recipient_inserts(true);

        let drafts = [RecipientDraft {
            patient_id: p.id,
            appointment_id: None,
        }];
        assert!(gw.create_campaign(&reactivation(clinic.id), &drafts).await.is_err());

        let listed = gw
            .list_campaigns(clinic.id, &CampaignQuery { campaign_type: None, limit: 10 })
            .await
            .unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn recipients_must_be_patients_of_the_campaign_clinic() {
        let gw = InMemoryGateway::new();
        let clinic = gw.add_clinic("A", None).unwrap();
        let other = gw.add_clinic("B", None).unwrap();
        let own = gw.add_patient(patient(clinic.id, "Anna", "Brun", false)).unwrap();
        let foreign = gw.add_patient(patient(other.id, "Eve", "Other", false)).unwrap();

        let drafts = [
            RecipientDraft { patient_id: own.id, appointment_id: None },
            RecipientDraft { patient_id: foreign.id, appointment_id: None },
        ];
        let err = gw
            .create_campaign(&reactivation(clinic.id), &drafts)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Constraint(_)));

        let store = gw.lock().unwrap();
        assert!(store.campaigns.is_empty());
        assert!(store.recipients.is_empty());
    }

    #[tokio::test]
    async fn messages_must_reference_rows_of_their_clinic() {
        let gw = InMemoryGateway::new();
        let clinic = gw.add_clinic("A", None).unwrap();
        let other = gw.add_clinic("B", None).unwrap();
        let own = gw.add_patient(patient(clinic.id, "Anna", "Brun", false)).unwrap();
        let foreign = gw.add_patient(patient(other.id, "Eve", "Other", false)).unwrap();

        let batch = [
            NewMessage::queued_sms(clinic.id, own.id, None, crate::models::MessageType::Reactivation, "a".into()),
            NewMessage::queued_sms(clinic.id, foreign.id, None, crate::models::MessageType::Reactivation, "b".into()),
        ];
        let err = gw.insert_messages(&batch).await.unwrap_err();
        assert!(matches!(err, GatewayError::Constraint(_)));
        assert!(gw.lock().unwrap().messages.is_empty());

        let dangling = [NewMessage::queued_sms(
            clinic.id,
            own.id,
            Some(Uuid::new_v4()),
            crate::models::MessageType::LastMinuteOffer,
            "c".into(),
        )];
        assert!(gw.insert_messages(&dangling).await.is_err());
        assert_eq!(gw.insert_messages(&batch[..1]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn appointments_are_created_scheduled_and_listed_in_order() {
        let gw = InMemoryGateway::new();
        let clinic = gw.add_clinic("A", None).unwrap();
        let other = gw.add_clinic("B", None).unwrap();
        let dr = gw.add_practitioner(clinic.id, "Dr").unwrap();
        let foreign_dr = gw.add_practitioner(other.id, "Dr B").unwrap();
        let p = gw.add_patient(patient(clinic.id, "Anna", "Brun", false)).unwrap();
        let now = Utc::now();

        let new = |practitioner_id, starts_at| NewAppointment {
            clinic_id: clinic.id,
            practitioner_id,
            patient_id: p.id,
            starts_at,
            notes: None,
        };
        let late = gw.insert_appointment(&new(dr, now + Duration::days(2))).await.unwrap();
        let early = gw.insert_appointment(&new(dr, now + Duration::days(1))).await.unwrap();
        assert_eq!(late.status, AppointmentStatus::Scheduled);

        let err = gw
            .insert_appointment(&new(foreign_dr, now))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Constraint(_)));

        let rows = gw
            .list_appointments(clinic.id, &AppointmentQuery { limit: 10, ..Default::default() })
            .await
            .unwrap();
        let ids: Vec<Uuid> = rows.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);

        let updated = gw
            .update_appointment_status(clinic.id, late.id, AppointmentStatus::Completed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, AppointmentStatus::Completed);
        assert!(gw
            .update_appointment_status(other.id, late.id, AppointmentStatus::Cancelled)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn revoked_or_expired_sessions_are_not_found() {
        let gw = InMemoryGateway::new();
        let clinic = gw.add_clinic("A", None).unwrap();
        let profile = gw
            .add_staff(clinic.id, "a@b.c", "hash", Role::Owner, "A")
            .unwrap();
        let now = Utc::now();

        let live = gw
            .insert_session(profile.id, "live", None, now + Duration::hours(1))
            .await
            .unwrap();
        gw.insert_session(profile.id, "old", None, now - Duration::hours(1))
            .await
            .unwrap();

        assert!(gw.find_active_session("live", now).await.unwrap().is_some());
        assert!(gw.find_active_session("old", now).await.unwrap().is_none());

        gw.revoke_session(live.session_token_id).await.unwrap();
        assert!(gw.find_active_session("live", now).await.unwrap().is_none());
    }
}
