//! User-facing text in `pt-BR` (default) and `en`.

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use crate::engine::{Rejection, SchedulingError};
use crate::model::{to_naive, CreditKind, Ms};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Locale {
    #[default]
    #[serde(rename = "pt-BR")]
    PtBr,
    #[serde(rename = "en")]
    En,
}

impl Locale {
    pub fn parse(tag: &str) -> Option<Locale> {
        let tag = tag.trim().to_ascii_lowercase();
        if tag.starts_with("en") {
            Some(Locale::En)
        } else if tag.starts_with("pt") {
            Some(Locale::PtBr)
        } else {
            None
        }
    }

    /// First supported language in an `Accept-Language` header.
    pub fn from_accept_language(header: Option<&str>, fallback: Locale) -> Locale {
        header
            .into_iter()
            .flat_map(|h| h.split(','))
            .filter_map(|part| part.split(';').next())
            .find_map(Locale::parse)
            .unwrap_or(fallback)
    }

    fn pick(self, pt: &'static str, en: &'static str) -> &'static str {
        match self {
            Locale::PtBr => pt,
            Locale::En => en,
        }
    }

    fn datetime(self, at: Ms) -> String {
        let fmt = self.pick("%d/%m/%Y %H:%M", "%Y-%m-%d %H:%M");
        to_naive(at).format(fmt).to_string()
    }

    fn weekday(self, day: Weekday) -> &'static str {
        match day {
            Weekday::Mon => self.pick("segunda-feira", "Monday"),
            Weekday::Tue => self.pick("terça-feira", "Tuesday"),
            Weekday::Wed => self.pick("quarta-feira", "Wednesday"),
            Weekday::Thu => self.pick("quinta-feira", "Thursday"),
            Weekday::Fri => self.pick("sexta-feira", "Friday"),
            Weekday::Sat => self.pick("sábado", "Saturday"),
            Weekday::Sun => self.pick("domingo", "Sunday"),
        }
    }
}

/// Success message keys for mutation responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Msg {
    Ok,
    ScheduleAssigned,
    ClassBooked,
    ClassRescheduled,
    ClassCanceled,
    ClassCompleted,
    ClassConverted,
    TeacherChanged,
    CreditsAdjusted,
    SlotAdded,
    SlotRemoved,
    SlotUpdated,
    TemplateEntryAdded,
    TemplateEntryRemoved,
}

impl Msg {
    pub fn text(self, locale: Locale) -> &'static str {
        match self {
            Msg::Ok => "OK",
            Msg::ScheduleAssigned => {
                locale.pick("Horário atribuído com sucesso", "Schedule assigned successfully")
            }
            Msg::ClassBooked => locale.pick("Aula agendada com sucesso", "Class booked successfully"),
            Msg::ClassRescheduled => {
                locale.pick("Aula reagendada com sucesso", "Class rescheduled successfully")
            }
            Msg::ClassCanceled => locale.pick("Aula cancelada com sucesso", "Class canceled successfully"),
            Msg::ClassCompleted => locale.pick("Aula concluída", "Class completed"),
            Msg::ClassConverted => locale.pick(
                "Aula convertida em horário disponível",
                "Class converted into an available slot",
            ),
            Msg::TeacherChanged => locale.pick("Professor alterado com sucesso", "Teacher changed successfully"),
            Msg::CreditsAdjusted => locale.pick("Créditos atualizados", "Credits updated"),
            Msg::SlotAdded => locale.pick("Horário adicionado", "Slot added"),
            Msg::SlotRemoved => locale.pick("Horário removido", "Slot removed"),
            Msg::SlotUpdated => locale.pick("Horário atualizado", "Slot updated"),
            Msg::TemplateEntryAdded => locale.pick("Dia adicionado ao cronograma", "Day added to the schedule"),
            Msg::TemplateEntryRemoved => locale.pick("Dia removido do cronograma", "Day removed from the schedule"),
        }
    }
}

pub fn classes_generated(count: usize, skipped: usize, locale: Locale) -> String {
    match locale {
        Locale::PtBr => format!("{count} aulas geradas, {skipped} ignoradas"),
        Locale::En => format!("{count} classes generated, {skipped} skipped"),
    }
}

pub fn classes_deleted(count: usize, locale: Locale) -> String {
    match locale {
        Locale::PtBr => format!("{count} aulas futuras excluídas. O histórico não foi afetado."),
        Locale::En => format!("{count} future classes deleted. History was not affected."),
    }
}

pub fn reopened_slot_title(locale: Locale) -> &'static str {
    locale.pick("Horário disponível", "Available slot")
}

fn not_found(entity: &str, locale: Locale) -> &'static str {
    match entity {
        "class" => locale.pick("Aula não encontrada", "Class not found"),
        "slot" => locale.pick("Horário não encontrado", "Slot not found"),
        "teacher" => locale.pick("Professor não encontrado", "Teacher not found"),
        "student" => locale.pick("Aluno não encontrado", "Student not found"),
        "template entry" => locale.pick("Dia do cronograma não encontrado", "Schedule entry not found"),
        _ => locale.pick("Registro não encontrado", "Record not found"),
    }
}

fn credit_name(kind: CreditKind, locale: Locale) -> &'static str {
    match kind {
        CreditKind::TeacherCancellation => {
            locale.pick("créditos de cancelamento do professor", "teacher cancellation credits")
        }
        CreditKind::Bonus => locale.pick("créditos bônus", "bonus credits"),
        CreditKind::LateStudent => locale.pick("créditos de matrícula tardia", "late enrollment credits"),
    }
}

fn rejection_message(rejection: &Rejection, locale: Locale) -> &'static str {
    match rejection {
        Rejection::NotInFuture => locale.pick("A data deve estar no futuro", "The date must be in the future"),
        Rejection::OutsideAvailability => locale.pick(
            "O horário não está dentro da disponibilidade do professor",
            "The time is not within the teacher's availability",
        ),
        Rejection::Overlaps(_) => locale.pick(
            "O professor já tem uma aula neste horário",
            "The teacher already has a class at this time",
        ),
        Rejection::SlotUnavailable(_) => locale.pick(
            "Este horário não está mais disponível",
            "This slot is no longer available",
        ),
        Rejection::TemplateOverlap(_) => locale.pick(
            "O aluno já tem uma aula semanal neste horário",
            "The student already has a weekly class at this time",
        ),
        Rejection::ConcurrentUpdate => locale.pick(
            "A agenda foi alterada ao mesmo tempo por outra pessoa. Tente novamente.",
            "The calendar was changed concurrently. Please try again.",
        ),
    }
}

pub fn error_message(err: &SchedulingError, locale: Locale) -> String {
    match err {
        SchedulingError::Authentication => {
            locale.pick("Autenticação necessária", "Authentication required").into()
        }
        SchedulingError::Authorization(_) => locale
            .pick("Você não tem permissão para esta ação", "You are not allowed to perform this action")
            .into(),
        SchedulingError::Validation(detail) => match locale {
            Locale::PtBr => format!("Dados inválidos: {detail}"),
            Locale::En => format!("Invalid request: {detail}"),
        },
        SchedulingError::NotFound { entity, .. } => not_found(entity, locale).into(),
        SchedulingError::Conflict(rejection) => rejection_message(rejection, locale).into(),
        SchedulingError::QuotaExceeded { limit, .. } => match locale {
            Locale::PtBr => format!("Limite de {limit} reagendamentos por mês atingido"),
            Locale::En => format!("Monthly limit of {limit} reschedules reached"),
        },
        SchedulingError::InsufficientCredit { kind, balance, .. } => match locale {
            Locale::PtBr => format!("Saldo insuficiente de {} ({balance})", credit_name(*kind, locale)),
            Locale::En => format!("Not enough {} (balance {balance})", credit_name(*kind, locale)),
        },
        SchedulingError::Storage(_) => locale
            .pick("Erro interno, tente novamente", "Internal error, please try again")
            .into(),
    }
}

/// Notification content produced by engine operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    ScheduleAssigned { day: Weekday, at: Ms },
    ClassBooked { at: Ms },
    ClassRescheduled { from: Ms, to: Ms },
    ClassCanceled { at: Ms },
    SlotReopened { at: Ms },
    TeacherChanged { at: Ms },
    ClassesDeleted { count: usize },
    ClassesGenerated { count: usize },
}

impl Notice {
    /// `(title, body)`
    pub fn render(&self, locale: Locale) -> (String, String) {
        let dt = |at: Ms| locale.datetime(at);
        match *self {
            Notice::ScheduleAssigned { day, at } => (
                locale.pick("Novo horário semanal", "New weekly schedule").into(),
                match locale {
                    Locale::PtBr => format!("Aulas toda {} às {}", locale.weekday(day), to_naive(at).format("%H:%M")),
                    Locale::En => format!("Classes every {} at {}", locale.weekday(day), to_naive(at).format("%H:%M")),
                },
            ),
            Notice::ClassBooked { at } => (
                locale.pick("Aula agendada", "Class booked").into(),
                match locale {
                    Locale::PtBr => format!("Nova aula em {}", dt(at)),
                    Locale::En => format!("New class on {}", dt(at)),
                },
            ),
            Notice::ClassRescheduled { from, to } => (
                locale.pick("Aula reagendada", "Class rescheduled").into(),
                match locale {
                    Locale::PtBr => format!("A aula de {} foi movida para {}", dt(from), dt(to)),
                    Locale::En => format!("The class on {} moved to {}", dt(from), dt(to)),
                },
            ),
            Notice::ClassCanceled { at } => (
                locale.pick("Aula cancelada", "Class canceled").into(),
                match locale {
                    Locale::PtBr => format!("A aula de {} foi cancelada", dt(at)),
                    Locale::En => format!("The class on {} was canceled", dt(at)),
                },
            ),
            Notice::SlotReopened { at } => (
                locale.pick("Horário liberado", "Slot reopened").into(),
                match locale {
                    Locale::PtBr => format!("O horário de {} está disponível novamente", dt(at)),
                    Locale::En => format!("The time on {} is available again", dt(at)),
                },
            ),
            Notice::TeacherChanged { at } => (
                locale.pick("Professor alterado", "Teacher changed").into(),
                match locale {
                    Locale::PtBr => format!("A aula de {} tem um novo professor", dt(at)),
                    Locale::En => format!("The class on {} has a new teacher", dt(at)),
                },
            ),
            Notice::ClassesDeleted { count } => (
                locale.pick("Aulas removidas", "Classes removed").into(),
                classes_deleted(count, locale),
            ),
            Notice::ClassesGenerated { count } => (
                locale.pick("Aulas geradas", "Classes generated").into(),
                match locale {
                    Locale::PtBr => format!("{count} novas aulas no seu cronograma"),
                    Locale::En => format!("{count} new classes on your schedule"),
                },
            ),
        }
    }
}
