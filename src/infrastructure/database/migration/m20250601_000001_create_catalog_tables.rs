//! Initial migration: every catalogue table, foreign keys, and indexes

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
	async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		// Union identity table; every catalogued entity has exactly one row.
		manager
			.create_table(
				Table::create()
					.table(Objects::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(Objects::ObjId)
							.big_integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(Objects::ParObjId).big_integer())
					.col(ColumnDef::new(Objects::Type).integer().not_null())
					.foreign_key(
						ForeignKey::create()
							.from(Objects::Table, Objects::ParObjId)
							.to(Objects::Table, Objects::ObjId)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_objects_par_obj_id")
					.table(Objects::Table)
					.col(Objects::ParObjId)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(ImageInfo::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(ImageInfo::ObjId)
							.big_integer()
							.not_null()
							.primary_key(),
					)
					.col(ColumnDef::new(ImageInfo::Type).integer().not_null())
					.col(ColumnDef::new(ImageInfo::SectorSize).big_integer().not_null())
					.col(ColumnDef::new(ImageInfo::Timezone).string().not_null())
					.col(ColumnDef::new(ImageInfo::Size).big_integer().not_null())
					.col(ColumnDef::new(ImageInfo::Hash).string())
					.col(ColumnDef::new(ImageInfo::DeviceId).string().unique_key())
					.foreign_key(
						ForeignKey::create()
							.from(ImageInfo::Table, ImageInfo::ObjId)
							.to(Objects::Table, Objects::ObjId)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(ImageNames::Table)
					.if_not_exists()
					.col(ColumnDef::new(ImageNames::ObjId).big_integer().not_null())
					.col(ColumnDef::new(ImageNames::Name).string().not_null())
					.col(ColumnDef::new(ImageNames::Sequence).big_integer().not_null())
					.primary_key(
						Index::create()
							.col(ImageNames::ObjId)
							.col(ImageNames::Sequence),
					)
					.foreign_key(
						ForeignKey::create()
							.from(ImageNames::Table, ImageNames::ObjId)
							.to(Objects::Table, Objects::ObjId)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(VsInfo::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(VsInfo::ObjId)
							.big_integer()
							.not_null()
							.primary_key(),
					)
					.col(ColumnDef::new(VsInfo::VsType).integer().not_null())
					.col(ColumnDef::new(VsInfo::ByteOffset).big_integer().not_null())
					.col(ColumnDef::new(VsInfo::BlockSize).big_integer().not_null())
					.foreign_key(
						ForeignKey::create()
							.from(VsInfo::Table, VsInfo::ObjId)
							.to(Objects::Table, Objects::ObjId)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.to_owned(),
			)
			.await?;

		// Volume description is `description`: `desc` is a reserved word and
		// must not appear in either dialect's DDL.
		manager
			.create_table(
				Table::create()
					.table(VsParts::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(VsParts::ObjId)
							.big_integer()
							.not_null()
							.primary_key(),
					)
					.col(ColumnDef::new(VsParts::SlotAddr).big_integer().not_null())
					.col(ColumnDef::new(VsParts::StartBlock).big_integer().not_null())
					.col(ColumnDef::new(VsParts::LengthBlocks).big_integer().not_null())
					.col(ColumnDef::new(VsParts::Description).string().not_null())
					.col(ColumnDef::new(VsParts::Flags).integer().not_null())
					.foreign_key(
						ForeignKey::create()
							.from(VsParts::Table, VsParts::ObjId)
							.to(Objects::Table, Objects::ObjId)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(FsInfo::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(FsInfo::ObjId)
							.big_integer()
							.not_null()
							.primary_key(),
					)
					.col(ColumnDef::new(FsInfo::ByteOffset).big_integer().not_null())
					.col(ColumnDef::new(FsInfo::FsType).integer().not_null())
					.col(ColumnDef::new(FsInfo::BlockSize).big_integer().not_null())
					.col(ColumnDef::new(FsInfo::BlockCount).big_integer().not_null())
					.col(ColumnDef::new(FsInfo::RootInum).big_integer().not_null())
					.col(ColumnDef::new(FsInfo::FirstInum).big_integer().not_null())
					.col(ColumnDef::new(FsInfo::LastInum).big_integer().not_null())
					.foreign_key(
						ForeignKey::create()
							.from(FsInfo::Table, FsInfo::ObjId)
							.to(Objects::Table, Objects::ObjId)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(Files::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(Files::ObjId)
							.big_integer()
							.not_null()
							.primary_key(),
					)
					.col(ColumnDef::new(Files::FsObjId).big_integer())
					.col(ColumnDef::new(Files::Type).integer().not_null())
					.col(ColumnDef::new(Files::AttrType).integer())
					.col(ColumnDef::new(Files::AttrId).integer())
					.col(ColumnDef::new(Files::Name).string().not_null())
					.col(ColumnDef::new(Files::MetaAddr).big_integer().not_null())
					.col(ColumnDef::new(Files::MetaSeq).big_integer().not_null())
					.col(ColumnDef::new(Files::DirType).integer().not_null())
					.col(ColumnDef::new(Files::MetaType).integer().not_null())
					.col(ColumnDef::new(Files::DirFlags).integer().not_null())
					.col(ColumnDef::new(Files::MetaFlags).integer().not_null())
					.col(ColumnDef::new(Files::Size).big_integer().not_null())
					.col(ColumnDef::new(Files::Ctime).big_integer().not_null())
					.col(ColumnDef::new(Files::Crtime).big_integer().not_null())
					.col(ColumnDef::new(Files::Atime).big_integer().not_null())
					.col(ColumnDef::new(Files::Mtime).big_integer().not_null())
					.col(ColumnDef::new(Files::Mode).big_integer().not_null())
					.col(ColumnDef::new(Files::Uid).big_integer().not_null())
					.col(ColumnDef::new(Files::Gid).big_integer().not_null())
					.col(ColumnDef::new(Files::Hash).string())
					.col(ColumnDef::new(Files::Known).integer().not_null())
					.col(
						ColumnDef::new(Files::HasLayout)
							.boolean()
							.not_null()
							.default(false),
					)
					.col(
						ColumnDef::new(Files::HasPath)
							.boolean()
							.not_null()
							.default(false),
					)
					.col(ColumnDef::new(Files::ParentPath).string())
					.foreign_key(
						ForeignKey::create()
							.from(Files::Table, Files::ObjId)
							.to(Objects::Table, Objects::ObjId)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.foreign_key(
						ForeignKey::create()
							.from(Files::Table, Files::FsObjId)
							.to(FsInfo::Table, FsInfo::ObjId)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_files_fs_obj_id")
					.table(Files::Table)
					.col(Files::FsObjId)
					.to_owned(),
			)
			.await?;

		// Parent resolution looks files up by (meta_addr, fs_obj_id).
		manager
			.create_index(
				Index::create()
					.name("idx_files_meta_addr_fs")
					.table(Files::Table)
					.col(Files::MetaAddr)
					.col(Files::FsObjId)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(FileLayout::Table)
					.if_not_exists()
					.col(ColumnDef::new(FileLayout::ObjId).big_integer().not_null())
					.col(ColumnDef::new(FileLayout::ByteStart).big_integer().not_null())
					.col(ColumnDef::new(FileLayout::ByteLen).big_integer().not_null())
					.col(ColumnDef::new(FileLayout::Sequence).big_integer().not_null())
					.primary_key(
						Index::create()
							.col(FileLayout::ObjId)
							.col(FileLayout::Sequence),
					)
					.foreign_key(
						ForeignKey::create()
							.from(FileLayout::Table, FileLayout::ObjId)
							.to(Objects::Table, Objects::ObjId)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_file_layout_obj_id")
					.table(FileLayout::Table)
					.col(FileLayout::ObjId)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(DbInfo::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(DbInfo::SchemaVersion)
							.integer()
							.not_null()
							.primary_key(),
					)
					.col(ColumnDef::new(DbInfo::EngineVersion).string().not_null())
					.to_owned(),
			)
			.await?;

		Ok(())
	}

	async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		for table in [
			Table::drop().table(DbInfo::Table).to_owned(),
			Table::drop().table(FileLayout::Table).to_owned(),
			Table::drop().table(Files::Table).to_owned(),
			Table::drop().table(FsInfo::Table).to_owned(),
			Table::drop().table(VsParts::Table).to_owned(),
			Table::drop().table(VsInfo::Table).to_owned(),
			Table::drop().table(ImageNames::Table).to_owned(),
			Table::drop().table(ImageInfo::Table).to_owned(),
			Table::drop().table(Objects::Table).to_owned(),
		] {
			manager.drop_table(table).await?;
		}
		Ok(())
	}
}

#[derive(DeriveIden)]
enum Objects {
	Table,
	ObjId,
	ParObjId,
	Type,
}

#[derive(DeriveIden)]
enum ImageInfo {
	Table,
	ObjId,
	Type,
	SectorSize,
	Timezone,
	Size,
	Hash,
	DeviceId,
}

#[derive(DeriveIden)]
enum ImageNames {
	Table,
	ObjId,
	Name,
	Sequence,
}

#[derive(DeriveIden)]
enum VsInfo {
	Table,
	ObjId,
	VsType,
	ByteOffset,
	BlockSize,
}

#[derive(DeriveIden)]
enum VsParts {
	Table,
	ObjId,
	SlotAddr,
	StartBlock,
	LengthBlocks,
	Description,
	Flags,
}

#[derive(DeriveIden)]
enum FsInfo {
	Table,
	ObjId,
	ByteOffset,
	FsType,
	BlockSize,
	BlockCount,
	RootInum,
	FirstInum,
	LastInum,
}

#[derive(DeriveIden)]
enum Files {
	Table,
	ObjId,
	FsObjId,
	Type,
	AttrType,
	AttrId,
	Name,
	MetaAddr,
	MetaSeq,
	DirType,
	MetaType,
	DirFlags,
	MetaFlags,
	Size,
	Ctime,
	Crtime,
	Atime,
	Mtime,
	Mode,
	Uid,
	Gid,
	Hash,
	Known,
	HasLayout,
	HasPath,
	ParentPath,
}

#[derive(DeriveIden)]
enum FileLayout {
	Table,
	ObjId,
	ByteStart,
	ByteLen,
	Sequence,
}

#[derive(DeriveIden)]
enum DbInfo {
	Table,
	SchemaVersion,
	EngineVersion,
}
