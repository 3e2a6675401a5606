// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Sources::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Sources::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Sources::Name).string().not_null())
                    .col(ColumnDef::new(Sources::Kind).string().not_null())
                    .col(ColumnDef::new(Sources::Endpoint).string().not_null())
                    .col(ColumnDef::new(Sources::Selectors).json())
                    .col(ColumnDef::new(Sources::Params).json().not_null())
                    .col(
                        ColumnDef::new(Sources::CrawlFrequencySecs)
                            .big_integer()
                            .not_null()
                            .default(3600),
                    )
                    .col(
                        ColumnDef::new(Sources::Status)
                            .string()
                            .not_null()
                            .default("active"),
                    )
                    .col(ColumnDef::new(Sources::LastCrawledAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Sources::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Announcements::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Announcements::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Announcements::SourceId).uuid().not_null())
                    .col(ColumnDef::new(Announcements::Url).string().not_null())
                    .col(ColumnDef::new(Announcements::FinalUrl).string())
                    .col(ColumnDef::new(Announcements::Title).string().not_null())
                    .col(ColumnDef::new(Announcements::ContentText).text().not_null())
                    .col(ColumnDef::new(Announcements::ContentHtml).text().not_null())
                    .col(ColumnDef::new(Announcements::PublishDate).date())
                    .col(ColumnDef::new(Announcements::RegionCode).string())
                    .col(ColumnDef::new(Announcements::ExamTypeCode).string())
                    .col(ColumnDef::new(Announcements::Year).integer())
                    .col(ColumnDef::new(Announcements::ExternalId).string())
                    .col(ColumnDef::new(Announcements::Attachments).json().not_null())
                    .col(
                        ColumnDef::new(Announcements::ContentHash)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(Announcements::CrawlStatus).string().not_null())
                    .col(ColumnDef::new(Announcements::DuplicateOf).uuid())
                    .col(ColumnDef::new(Announcements::CrawledAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Announcements::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Announcements::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_announcements_source")
                            .from(Announcements::Table, Announcements::SourceId)
                            .to(Sources::Table, Sources::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Positions::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Positions::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Positions::AnnouncementId).uuid().not_null())
                    .col(ColumnDef::new(Positions::NaturalKey).string().not_null())
                    .col(ColumnDef::new(Positions::SourceUrl).string().not_null())
                    .col(ColumnDef::new(Positions::Department).string().not_null())
                    .col(ColumnDef::new(Positions::DepartmentCode).string())
                    .col(ColumnDef::new(Positions::Title).string().not_null())
                    .col(ColumnDef::new(Positions::PositionCode).string())
                    .col(
                        ColumnDef::new(Positions::RecruitCount)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(ColumnDef::new(Positions::WorkLocation).string().not_null())
                    .col(ColumnDef::new(Positions::Province).string())
                    .col(ColumnDef::new(Positions::City).string())
                    .col(ColumnDef::new(Positions::EducationMin).string())
                    .col(ColumnDef::new(Positions::DegreeRequired).string())
                    .col(ColumnDef::new(Positions::Majors).json().not_null())
                    .col(
                        ColumnDef::new(Positions::MajorUnlimited)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Positions::PoliticalStatus).string())
                    .col(ColumnDef::new(Positions::AgeMin).integer())
                    .col(ColumnDef::new(Positions::AgeMax).integer())
                    .col(ColumnDef::new(Positions::WorkExpMin).integer())
                    .col(ColumnDef::new(Positions::GrassrootsExpMin).integer())
                    .col(
                        ColumnDef::new(Positions::HukouRequired)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Positions::HukouProvinces).json().not_null())
                    .col(ColumnDef::new(Positions::Gender).string())
                    .col(
                        ColumnDef::new(Positions::FreshGradOnly)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Positions::OtherRequirements).text())
                    .col(ColumnDef::new(Positions::Notes).text())
                    .col(ColumnDef::new(Positions::SourceKind).string().not_null())
                    .col(ColumnDef::new(Positions::Confidence).small_integer().not_null())
                    .col(
                        ColumnDef::new(Positions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_positions_announcement")
                            .from(Positions::Table, Positions::AnnouncementId)
                            .to(Announcements::Table, Announcements::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CrawlTasks::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(CrawlTasks::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(CrawlTasks::Kind).string().not_null())
                    .col(ColumnDef::new(CrawlTasks::Target).string().not_null())
                    .col(ColumnDef::new(CrawlTasks::Domain).string().not_null())
                    .col(ColumnDef::new(CrawlTasks::Params).json().not_null())
                    .col(ColumnDef::new(CrawlTasks::State).string().not_null())
                    .col(
                        ColumnDef::new(CrawlTasks::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(CrawlTasks::LastError).text())
                    .col(ColumnDef::new(CrawlTasks::LastErrorKind).string())
                    .col(ColumnDef::new(CrawlTasks::Warnings).json().not_null())
                    .col(
                        ColumnDef::new(CrawlTasks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CrawlTasks::StartedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(CrawlTasks::FinishedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(CrawlTasks::NextRunAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CrawlEvents::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(CrawlEvents::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(CrawlEvents::TaskId).uuid())
                    .col(ColumnDef::new(CrawlEvents::SourceId).uuid())
                    .col(ColumnDef::new(CrawlEvents::AnnouncementId).uuid())
                    .col(ColumnDef::new(CrawlEvents::EventType).string().not_null())
                    .col(ColumnDef::new(CrawlEvents::Message).text().not_null())
                    .col(
                        ColumnDef::new(CrawlEvents::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Sessions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Sessions::Provider)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Sessions::Cookies).text().not_null())
                    .col(ColumnDef::new(Sessions::Token).string())
                    .col(
                        ColumnDef::new(Sessions::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Sessions::LastValidatedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Sessions::Valid).boolean().not_null())
                    .col(ColumnDef::new(Sessions::Account).json())
                    .col(
                        ColumnDef::new(Sessions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Credentials::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Credentials::Provider)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Credentials::Phone).string().not_null())
                    .col(ColumnDef::new(Credentials::Password).string().not_null())
                    .col(
                        ColumnDef::new(Credentials::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Credentials::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Sessions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CrawlEvents::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CrawlTasks::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Positions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Announcements::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Sources::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Sources {
    Table,
    Id,
    Name,
    Kind,
    Endpoint,
    Selectors,
    Params,
    CrawlFrequencySecs,
    Status,
    LastCrawledAt,
    CreatedAt,
}

#[derive(DeriveIden)]
pub enum Announcements {
    Table,
    Id,
    SourceId,
    Url,
    FinalUrl,
    Title,
    ContentText,
    ContentHtml,
    PublishDate,
    RegionCode,
    ExamTypeCode,
    Year,
    ExternalId,
    Attachments,
    ContentHash,
    CrawlStatus,
    DuplicateOf,
    CrawledAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum Positions {
    Table,
    Id,
    AnnouncementId,
    NaturalKey,
    SourceUrl,
    Department,
    DepartmentCode,
    Title,
    PositionCode,
    RecruitCount,
    WorkLocation,
    Province,
    City,
    EducationMin,
    DegreeRequired,
    Majors,
    MajorUnlimited,
    PoliticalStatus,
    AgeMin,
    AgeMax,
    WorkExpMin,
    GrassrootsExpMin,
    HukouRequired,
    HukouProvinces,
    Gender,
    FreshGradOnly,
    OtherRequirements,
    Notes,
    SourceKind,
    Confidence,
    CreatedAt,
}

#[derive(DeriveIden)]
pub enum CrawlTasks {
    Table,
    Id,
    Kind,
    Target,
    Domain,
    Params,
    State,
    Attempts,
    LastError,
    LastErrorKind,
    Warnings,
    CreatedAt,
    StartedAt,
    FinishedAt,
    NextRunAt,
}

#[derive(DeriveIden)]
pub enum CrawlEvents {
    Table,
    Id,
    TaskId,
    SourceId,
    AnnouncementId,
    EventType,
    Message,
    CreatedAt,
}

#[derive(DeriveIden)]
pub enum Sessions {
    Table,
    Provider,
    Cookies,
    Token,
    ExpiresAt,
    LastValidatedAt,
    Valid,
    Account,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum Credentials {
    Table,
    Provider,
    Phone,
    Password,
    UpdatedAt,
}
