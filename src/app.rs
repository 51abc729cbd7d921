use crate::charts::{WindowChart, BABY_COLOR, MOTHER_COLOR};
use crate::session::{lock_session, save_shared, DisplaySnapshot, SharedSession};
use crate::supervisor::{ConnectionState, SessionUpdate, SupervisorHandle};
use crossbeam_channel::Receiver;
use iced::widget::{button, column, container, row, text};
use iced::{Element, Length, Subscription, Task};
use plotters_iced::ChartWidget;

// Iced Application State
pub struct FetalMonitor {
    session: SharedSession,
    updates: Receiver<SessionUpdate>,
    supervisor: SupervisorHandle,
    snapshot: DisplaySnapshot,
    connection_state: ConnectionState,
}

#[derive(Debug, Clone)]
pub enum Message {
    Tick,
    Save,
    Restart,
}

impl FetalMonitor {
    pub fn new(
        session: SharedSession,
        updates: Receiver<SessionUpdate>,
        supervisor: SupervisorHandle,
    ) -> (Self, Task<Message>) {
        let snapshot = lock_session(&session).snapshot_for_display();
        (
            FetalMonitor {
                session,
                updates,
                supervisor,
                snapshot,
                connection_state: ConnectionState::Idle,
            },
            Task::none(),
        )
    }

    pub fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::Tick => {
                // Drain lifecycle updates without blocking
                for update in self.updates.try_iter() {
                    match update {
                        SessionUpdate::State(state) => self.connection_state = state,
                        SessionUpdate::Status(status) => log::debug!("Status: {}", status),
                    }
                }
                self.snapshot = lock_session(&self.session).snapshot_for_display();
            }
            Message::Save => {
                lock_session(&self.session).set_status("Saving...");
                let session = self.session.clone();
                // Writer thread keeps the file write off the UI thread; the
                // outcome is reported through the session status line
                std::thread::spawn(move || {
                    let _ = save_shared(&session);
                });
            }
            Message::Restart => {
                lock_session(&self.session).restart();
            }
        }
        Task::none()
    }

    pub fn subscription(&self) -> Subscription<Message> {
        iced::time::every(std::time::Duration::from_millis(16)).map(|_| Message::Tick)
    }

    pub fn view(&'_ self) -> Element<'_, Message> {
        let snapshot = &self.snapshot;

        let rates = text(format!(
            "Mom HR: {:.0} BPM   |   Baby HR: {:.0} BPM",
            snapshot.bpm_primary, snapshot.bpm_derived
        ))
        .size(28);

        let temperature = match snapshot.skin_temperature {
            Some(t) => format!("Skin Temperature: {:.2} °C", t),
            None => "Skin Temperature: -- °C".to_string(),
        };

        let last_seq = snapshot
            .last_seq
            .map_or_else(|| "-".to_string(), |seq| seq.to_string());
        let stats = text(format!(
            "{} samples logged (last seq {}), {} frames dropped",
            snapshot.samples_logged, last_seq, snapshot.dropped_frames
        ))
        .size(14);

        let save_button = button(text("Save")).on_press(Message::Save).padding(10);
        let restart_button = button(text("Restart")).padding(10).on_press_maybe(
            if self.supervisor.is_stopped() {
                None
            } else {
                Some(Message::Restart)
            },
        );

        let header = row![
            column![rates, text(temperature).size(18)].width(Length::Fill),
            save_button,
            restart_button
        ]
        .spacing(10);

        let status_bar = row![
            text(format!("[{}] {}", self.connection_state.label(), snapshot.status)).width(Length::Fill),
            stats
        ];

        let mother_chart = ChartWidget::new(WindowChart {
            caption: "Mother ECG",
            values: &snapshot.primary_window,
            range: snapshot.primary_range,
            sample_interval: snapshot.sample_interval,
            color: MOTHER_COLOR,
        })
        .width(Length::Fill)
        .height(Length::Fill);

        let baby_chart = ChartWidget::new(WindowChart {
            caption: "Baby ECG (Calculated)",
            values: &snapshot.derived_window,
            range: snapshot.derived_range,
            sample_interval: snapshot.sample_interval,
            color: BABY_COLOR,
        })
        .width(Length::Fill)
        .height(Length::Fill);

        let content = column![header, mother_chart, baby_chart, status_bar]
            .spacing(10)
            .padding(20);

        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }
}
