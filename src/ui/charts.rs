/// Side panel listing the open chart views
use iced::widget::{button, canvas, column, container, horizontal_space, row, scrollable, text, Column};
use iced::{Alignment, Element, Length};

use crate::app::Message;
use crate::state::charts::ChartWindows;
use crate::state::data::ChartData;
use crate::ui::histogram::Histogram;
use crate::ui::profile::LineProfile;

const CHART_HEIGHT: f32 = 150.0;

pub fn view(charts: &ChartWindows) -> Element<'_, Message> {
    let views = charts.iter().fold(Column::new().spacing(12), |col, (label, view)| {
        let body: Element<'_, Message> = match &view.data {
            Some(ChartData::Histogram(bins)) => canvas(Histogram { bins })
                .width(Length::Fill)
                .height(Length::Fixed(CHART_HEIGHT))
                .into(),
            Some(ChartData::LineProfile(points)) => canvas(LineProfile { points })
                .width(Length::Fill)
                .height(Length::Fixed(CHART_HEIGHT))
                .into(),
            None => container(text("Waiting for data…").size(12))
                .center_x(Length::Fill)
                .height(Length::Fixed(CHART_HEIGHT))
                .into(),
        };

        col.push(
            container(
                column![
                    row![
                        text(label.as_str()).size(13),
                        horizontal_space(),
                        button(text("Close").size(12))
                            .padding([2, 6])
                            .style(button::secondary)
                            .on_press(Message::CloseChart(label.clone())),
                    ]
                    .align_y(Alignment::Center),
                    body,
                ]
                .spacing(4),
            )
            .padding(6)
            .style(container::bordered_box),
        )
    });

    scrollable(views).width(Length::Fixed(320.0)).into()
}
